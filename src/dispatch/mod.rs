//! Publish-or-archive dispatch engine.
//!
//! Every routing decision ends in exactly one of two states: delivered to the
//! broker, or archived to disk. A failed attempt is never retried here; the
//! archived copy can be fed back through `mail2rmq read`.

pub mod archive;
pub mod payload;

use std::path::Path;

use crate::broker::{Broker, Connector, PublishTarget};
use crate::error::{Mail2RmqError, Result};
use crate::model::decision::{DispatchOutcome, Payload, RoutingDecision};
use crate::model::message::ParsedMessage;

/// Executes routing decisions against one exchange.
pub struct Dispatcher<'a> {
    connector: &'a dyn Connector,
    exchange: &'a str,
    archive_dir: &'a Path,
}

impl<'a> Dispatcher<'a> {
    pub fn new(connector: &'a dyn Connector, exchange: &'a str, archive_dir: &'a Path) -> Self {
        Self {
            connector,
            exchange,
            archive_dir,
        }
    }

    /// Dispatch every decision in order.
    pub fn dispatch_all(
        &self,
        decisions: Vec<RoutingDecision>,
        msg: &ParsedMessage,
    ) -> Vec<DispatchOutcome> {
        decisions
            .into_iter()
            .map(|decision| self.dispatch(decision, msg))
            .collect()
    }

    /// Publish one decision, archiving the raw message on any failure.
    ///
    /// The decision is consumed: an attachment artifact it carries is
    /// deleted before this returns, whatever the outcome.
    pub fn dispatch(&self, decision: RoutingDecision, msg: &ParsedMessage) -> DispatchOutcome {
        let RoutingDecision {
            queue,
            routing_key,
            payload,
        } = decision;
        let kind = payload.kind();

        tracing::info!(
            exchange = self.exchange,
            queue = %queue,
            kind = %kind,
            "Dispatching"
        );

        let target = PublishTarget::new(self.exchange, &queue, &routing_key);
        let mut broker = self.connector.broker(&target);

        let outcome = match attempt(broker.as_mut(), &payload, msg) {
            Ok(()) => {
                tracing::info!(queue = %queue, "Message ingested into broker");
                DispatchOutcome::delivered(&queue, &routing_key, kind)
            }
            Err(error) => {
                match &error {
                    Mail2RmqError::Connection(_) | Mail2RmqError::ChannelClosed => {
                        tracing::error!(queue = %queue, error = %error, "Failed to connect to broker");
                    }
                    _ => {
                        tracing::error!(queue = %queue, error = %error, "Failed to ingest message into broker");
                    }
                }
                let archived = archive::archive(self.exchange, &queue, msg.raw(), self.archive_dir);
                if let Err(e) = &archived {
                    tracing::error!(queue = %queue, error = %e, "Message could not be archived");
                }
                DispatchOutcome::failed(&queue, &routing_key, kind, error, archived)
            }
        };

        broker.close();
        drop(payload);
        outcome
    }
}

/// Connect, render, publish. Any error sends the caller down the archive path.
fn attempt(broker: &mut dyn Broker, payload: &Payload, msg: &ParsedMessage) -> Result<()> {
    broker.connect()?;
    if !broker.is_channel_open() {
        return Err(Mail2RmqError::ChannelClosed);
    }
    tracing::info!("Connected to broker");

    let body = payload::render(payload, msg)?;
    if body.is_empty() {
        return Err(Mail2RmqError::EmptyPayload);
    }
    broker.publish(&body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::model::decision::{AttachmentArtifact, PayloadKind};
    use crate::model::message::MessagePart;

    #[derive(Debug, Clone, Copy, Default)]
    struct Behavior {
        refuse_connect: bool,
        channel_closed: bool,
        reject_publish: bool,
    }

    #[derive(Debug, Default)]
    struct Journal {
        published: Vec<(PublishTarget, String)>,
        opened: usize,
        closed: usize,
    }

    struct FakeConnector {
        behavior: Behavior,
        journal: Rc<RefCell<Journal>>,
    }

    struct FakeBroker {
        target: PublishTarget,
        behavior: Behavior,
        journal: Rc<RefCell<Journal>>,
        open: bool,
    }

    impl FakeConnector {
        fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                journal: Rc::default(),
            }
        }
    }

    impl Connector for FakeConnector {
        fn broker(&self, target: &PublishTarget) -> Box<dyn Broker> {
            Box::new(FakeBroker {
                target: target.clone(),
                behavior: self.behavior,
                journal: Rc::clone(&self.journal),
                open: false,
            })
        }
    }

    impl Broker for FakeBroker {
        fn connect(&mut self) -> Result<()> {
            if self.behavior.refuse_connect {
                return Err(Mail2RmqError::Connection("connection refused".into()));
            }
            self.journal.borrow_mut().opened += 1;
            self.open = !self.behavior.channel_closed;
            Ok(())
        }

        fn is_channel_open(&self) -> bool {
            self.open
        }

        fn publish(&mut self, body: &str) -> Result<()> {
            if self.behavior.reject_publish {
                return Err(Mail2RmqError::Publish("NACK".into()));
            }
            self.journal
                .borrow_mut()
                .published
                .push((self.target.clone(), body.to_string()));
            Ok(())
        }

        fn close(&mut self) {
            self.open = false;
            self.journal.borrow_mut().closed += 1;
        }
    }

    const RAW: &[u8] = b"From: a@b.com\nTo: c@d.com\nSubject: Queue1\n\nEmail Message\n";

    fn message(body: &str) -> ParsedMessage {
        ParsedMessage::new(
            "Queue1",
            "a@b.com",
            "c@d.com",
            MessagePart::leaf("text/plain", None, body),
            RAW.to_vec(),
        )
    }

    fn archived_files(dir: &Path) -> Vec<std::path::PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }

    #[test]
    fn test_body_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let connector = FakeConnector::new(Behavior::default());
        let dispatcher = Dispatcher::new(&connector, "mail2rmq", dir.path());

        let outcome = dispatcher.dispatch(
            RoutingDecision::new("Queue1", Payload::Body),
            &message("Email Message"),
        );

        assert!(outcome.delivered);
        assert!(!outcome.archived());
        assert!(outcome.error.is_none());
        assert_eq!(outcome.kind, PayloadKind::Body);

        let journal = connector.journal.borrow();
        assert_eq!(journal.published.len(), 1);
        let (target, body) = &journal.published[0];
        assert_eq!(target, &PublishTarget::new("mail2rmq", "Queue1", "Queue1"));
        assert_eq!(body, "Email Message");
        assert_eq!(journal.closed, 1);
        assert!(archived_files(dir.path()).is_empty());
    }

    #[test]
    fn test_connection_failure_archives_raw_message() {
        let dir = tempfile::tempdir().unwrap();
        let connector = FakeConnector::new(Behavior {
            refuse_connect: true,
            ..Behavior::default()
        });
        let dispatcher = Dispatcher::new(&connector, "mail2rmq", dir.path());

        let outcome = dispatcher.dispatch(
            RoutingDecision::new("Queue1", Payload::Body),
            &message("Email Message"),
        );

        assert!(!outcome.delivered);
        assert!(matches!(outcome.error, Some(Mail2RmqError::Connection(_))));
        let path = outcome.archive_path.clone().expect("archived");
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("mail2rmq-Queue1-"));
        assert!(name.ends_with(&format!(".{}.email.txt", std::process::id())));
        assert_eq!(std::fs::read(&path).unwrap(), RAW);
        assert!(connector.journal.borrow().published.is_empty());
    }

    #[test]
    fn test_closed_channel_archives() {
        let dir = tempfile::tempdir().unwrap();
        let connector = FakeConnector::new(Behavior {
            channel_closed: true,
            ..Behavior::default()
        });
        let dispatcher = Dispatcher::new(&connector, "ex", dir.path());
        let outcome = dispatcher.dispatch(
            RoutingDecision::new("Queue1", Payload::Body),
            &message("x"),
        );
        assert!(matches!(outcome.error, Some(Mail2RmqError::ChannelClosed)));
        assert!(outcome.archived());
        // Connection was acquired, so it must have been closed
        assert_eq!(connector.journal.borrow().closed, 1);
    }

    #[test]
    fn test_empty_body_archives() {
        let dir = tempfile::tempdir().unwrap();
        let connector = FakeConnector::new(Behavior::default());
        let dispatcher = Dispatcher::new(&connector, "ex", dir.path());
        let outcome = dispatcher.dispatch(
            RoutingDecision::new("Queue1", Payload::Body),
            &message(""),
        );
        assert!(matches!(outcome.error, Some(Mail2RmqError::EmptyPayload)));
        assert!(outcome.archived());
        assert!(connector.journal.borrow().published.is_empty());
    }

    #[test]
    fn test_publish_rejected_archives() {
        let dir = tempfile::tempdir().unwrap();
        let connector = FakeConnector::new(Behavior {
            reject_publish: true,
            ..Behavior::default()
        });
        let dispatcher = Dispatcher::new(&connector, "ex", dir.path());
        let outcome = dispatcher.dispatch(
            RoutingDecision::new("ErrorQueue", Payload::Envelope),
            &message("x"),
        );
        assert!(matches!(outcome.error, Some(Mail2RmqError::Publish(_))));
        assert_eq!(archived_files(dir.path()).len(), 1);
    }

    #[test]
    fn test_archive_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let connector = FakeConnector::new(Behavior {
            refuse_connect: true,
            ..Behavior::default()
        });
        let dispatcher = Dispatcher::new(&connector, "ex", &missing);
        let outcome = dispatcher.dispatch(
            RoutingDecision::new("Queue1", Payload::Body),
            &message("x"),
        );
        assert!(!outcome.delivered);
        assert!(!outcome.archived());
        assert!(matches!(
            outcome.archive_error,
            Some(Mail2RmqError::Archive { .. })
        ));
    }

    #[test]
    fn test_attachment_file_removed_either_way() {
        for behavior in [
            Behavior::default(),
            Behavior {
                refuse_connect: true,
                ..Behavior::default()
            },
        ] {
            let dir = tempfile::tempdir().unwrap();
            let encoded = dir.path().join("report.pdf.encoded");
            std::fs::write(&encoded, "JVBERi0xLjQK\n").unwrap();

            let connector = FakeConnector::new(behavior);
            let dispatcher = Dispatcher::new(&connector, "ex", dir.path());
            let decision = RoutingDecision::new(
                "FileQueue1",
                Payload::Attachment(AttachmentArtifact::new(
                    "report.pdf",
                    &encoded,
                    "application/pdf",
                )),
            );

            let outcome = dispatcher.dispatch(decision, &message("x"));
            assert_eq!(outcome.kind, PayloadKind::Attachment);
            assert!(outcome.delivered != outcome.archived());
            assert!(!encoded.exists());
        }
    }

    #[test]
    fn test_attachment_published_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let encoded = dir.path().join("report.pdf.encoded");
        std::fs::write(&encoded, "JVBERi0xLjQK\n").unwrap();

        let connector = FakeConnector::new(Behavior::default());
        let dispatcher = Dispatcher::new(&connector, "ex", dir.path());
        let decision = RoutingDecision::new(
            "AddrQueue",
            Payload::Attachment(AttachmentArtifact::new(
                "report.pdf",
                &encoded,
                "application/pdf",
            )),
        );
        dispatcher.dispatch(decision, &message("x"));

        let journal = connector.journal.borrow();
        let value: serde_json::Value = serde_json::from_str(&journal.published[0].1).unwrap();
        assert_eq!(value["filename"], "report.pdf");
    }

    #[test]
    fn test_one_outcome_per_decision() {
        let dir = tempfile::tempdir().unwrap();
        let connector = FakeConnector::new(Behavior::default());
        let dispatcher = Dispatcher::new(&connector, "ex", dir.path());
        let decisions = vec![
            RoutingDecision::new("Q1", Payload::Body),
            RoutingDecision::new("Q2", Payload::Envelope),
        ];
        let outcomes = dispatcher.dispatch_all(decisions, &message("x"));
        let queues: Vec<&str> = outcomes.iter().map(|o| o.queue.as_str()).collect();
        assert_eq!(queues, vec!["Q1", "Q2"]);
        assert_eq!(connector.journal.borrow().opened, 2);
        assert_eq!(connector.journal.borrow().closed, 2);
    }
}
