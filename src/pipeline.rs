//! One message from input to broker: classify, then dispatch each decision.

use std::io::Read;
use std::path::Path;

use crate::broker::Connector;
use crate::classify::{Classifier, Route};
use crate::config::Settings;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::model::decision::DispatchOutcome;
use crate::model::message::ParsedMessage;
use crate::parser::eml;

/// What happened to one message.
#[derive(Debug)]
pub struct MessageReport {
    pub subject: String,
    pub route: Route,
    /// One outcome per routing decision, in dispatch order.
    pub outcomes: Vec<DispatchOutcome>,
}

impl MessageReport {
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.delivered).count()
    }

    pub fn archived(&self) -> usize {
        self.outcomes.iter().filter(|o| o.archived()).count()
    }

    /// Failures for which not even an archive copy exists.
    pub fn lost(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| !o.delivered && !o.archived())
            .count()
    }
}

/// Classification and dispatch bound to one validated configuration.
pub struct Pipeline<'a> {
    settings: &'a Settings,
    connector: &'a dyn Connector,
    debug_log: Option<tracing::Dispatch>,
}

impl<'a> Pipeline<'a> {
    pub fn new(settings: &'a Settings, connector: &'a dyn Connector) -> Self {
        Self {
            settings,
            connector,
            debug_log: None,
        }
    }

    /// Subscriber receiving the events of debug-route dispatches.
    pub fn with_debug_log(mut self, dispatch: tracing::Dispatch) -> Self {
        self.debug_log = Some(dispatch);
        self
    }

    /// Read one message from a stream (standard input) and process it.
    pub fn process_reader<R: Read>(&self, reader: R) -> Result<MessageReport> {
        tracing::info!("Parsing email...");
        let msg = eml::read_message(reader)?;
        Ok(self.process(&msg))
    }

    /// Read one message file and process it.
    pub fn process_file(&self, path: &Path) -> Result<MessageReport> {
        tracing::info!(path = %path.display(), "Parsing email file...");
        let msg = eml::read_message_file(path)?;
        Ok(self.process(&msg))
    }

    /// Classify and dispatch an already parsed message.
    pub fn process(&self, msg: &ParsedMessage) -> MessageReport {
        let classification = Classifier::new(self.settings).classify(msg);
        let dispatcher = Dispatcher::new(
            self.connector,
            &self.settings.broker.exchange_name,
            &self.settings.archive_dir,
        );

        let decisions = classification.decisions;
        let outcomes = match (&self.debug_log, classification.route) {
            (Some(debug_log), Route::Debug) => tracing::dispatcher::with_default(debug_log, || {
                tracing::info!(subject = %classification.subject, "Debug route dispatch");
                dispatcher.dispatch_all(decisions, msg)
            }),
            _ => dispatcher.dispatch_all(decisions, msg),
        };

        let report = MessageReport {
            subject: classification.subject,
            route: classification.route,
            outcomes,
        };
        tracing::info!(
            subject = %report.subject,
            delivered = report.delivered(),
            archived = report.archived(),
            "Message processed"
        );
        if report.lost() > 0 {
            tracing::error!(
                subject = %report.subject,
                lost = report.lost(),
                "Message neither delivered nor archived"
            );
        }
        report
    }
}
