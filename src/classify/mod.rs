//! Ordered routing rules: parsed message → routing decisions.
//!
//! Rules are evaluated in priority order and the first match wins:
//!
//! 1. The normalized subject names a valid queue → publish the body there.
//! 2. The sender is in the address map → publish each allowed attachment to
//!    the mapped queue, or an envelope to the address error queue if none.
//! 3. The sender is the debug address → run rules 1, 2 and 4 against the
//!    debug route table.
//! 4. Fallback → attachments go to the queue named by the subject when it is
//!    a file queue, otherwise to the file error queue. Without attachments an
//!    envelope goes to the error queue.

pub mod subject;

use std::path::Path;

use regex::Regex;

use crate::config::{DebugSettings, RouteTable, Settings};
use crate::extract::attachment::extract_attachments;
use crate::model::address::first_address;
use crate::model::decision::{Payload, RoutingDecision};
use crate::model::message::ParsedMessage;

/// Which route table produced a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Primary,
    Debug,
}

/// Decisions for one message, in dispatch order.
#[derive(Debug)]
pub struct Classification {
    pub decisions: Vec<RoutingDecision>,
    pub route: Route,
    /// Subject after filtering and canonicalization.
    pub subject: String,
    /// First address of the `From:` header.
    pub from_address: Option<String>,
}

/// Applies the routing rules of one [`RouteTable`].
pub struct Classifier<'a> {
    routes: &'a RouteTable,
    debug: Option<&'a DebugSettings>,
    attach_types: &'a [String],
    subject_filters: &'a [Regex],
    tmp_dir: &'a Path,
}

impl<'a> Classifier<'a> {
    /// Classifier over the primary route table, with the debug route enabled
    /// when configured.
    pub fn new(settings: &'a Settings) -> Self {
        Self {
            routes: &settings.routes,
            debug: settings.debug.as_ref(),
            attach_types: &settings.attach_types,
            subject_filters: &settings.subject_filters,
            tmp_dir: &settings.tmp_dir,
        }
    }

    /// Same rules, different table. The returned classifier has no debug
    /// route of its own.
    pub fn with_routes(&self, routes: &'a RouteTable) -> Self {
        Self {
            routes,
            debug: None,
            attach_types: self.attach_types,
            subject_filters: self.subject_filters,
            tmp_dir: self.tmp_dir,
        }
    }

    /// Route a message. Always yields at least one decision.
    ///
    /// Attachment extraction happens here, so the returned decisions may own
    /// encoded files in the temp directory.
    pub fn classify(&self, msg: &ParsedMessage) -> Classification {
        let subject = subject::normalize_subject(&msg.subject, self.subject_filters);
        let from_address = first_address(&msg.from);
        tracing::debug!(subject = %subject, from = ?from_address, "Classifying message");

        if let Some(decisions) = self.match_subject(&subject) {
            return self.classification(decisions, Route::Primary, subject, from_address);
        }

        if let Some(decisions) = self.match_address(from_address.as_deref(), msg) {
            return self.classification(decisions, Route::Primary, subject, from_address);
        }

        if let Some(debug_settings) = self.debug_route(from_address.as_deref()) {
            let address = &debug_settings.address;
            tracing::info!(address = %address, "Debug address detected, using debug routes");
            let inner = self.with_routes(&debug_settings.routes);
            let decisions = inner
                .match_subject(&subject)
                .or_else(|| inner.match_address(from_address.as_deref(), msg))
                .unwrap_or_else(|| inner.fallback(&subject, msg));
            return self.classification(decisions, Route::Debug, subject, from_address);
        }

        let decisions = self.fallback(&subject, msg);
        self.classification(decisions, Route::Primary, subject, from_address)
    }

    fn classification(
        &self,
        decisions: Vec<RoutingDecision>,
        route: Route,
        subject: String,
        from_address: Option<String>,
    ) -> Classification {
        Classification {
            decisions,
            route,
            subject,
            from_address,
        }
    }

    /// Rule 1.
    fn match_subject(&self, subject: &str) -> Option<Vec<RoutingDecision>> {
        if subject.is_empty() || !self.routes.valid_queues.iter().any(|q| q == subject) {
            return None;
        }
        tracing::info!(subject, "Valid email subject");
        Some(vec![RoutingDecision::new(subject, Payload::Body)])
    }

    /// Rule 2.
    fn match_address(
        &self,
        from_address: Option<&str>,
        msg: &ParsedMessage,
    ) -> Option<Vec<RoutingDecision>> {
        let from = from_address?;
        let queue = self
            .routes
            .address_queues
            .iter()
            .find(|(addr, _)| addr.eq_ignore_ascii_case(from))
            .map(|(_, queue)| queue.as_str())?;

        tracing::info!(from, queue, "Valid email address");
        let artifacts = extract_attachments(msg, self.attach_types, self.tmp_dir);
        if artifacts.is_empty() {
            tracing::warn!(from, "No valid attachment for mapped address");
            return Some(vec![RoutingDecision::new(
                &self.routes.address_error_queue,
                Payload::Envelope,
            )]);
        }

        Some(
            artifacts
                .into_iter()
                .map(|a| RoutingDecision::new(queue, Payload::Attachment(a)))
                .collect(),
        )
    }

    /// Rule 3 gate.
    fn debug_route(&self, from_address: Option<&str>) -> Option<&'a DebugSettings> {
        let debug = self.debug?;
        let from = from_address?;
        debug.address.eq_ignore_ascii_case(from).then_some(debug)
    }

    /// Rule 4.
    fn fallback(&self, subject: &str, msg: &ParsedMessage) -> Vec<RoutingDecision> {
        let artifacts = extract_attachments(msg, self.attach_types, self.tmp_dir);
        if artifacts.is_empty() {
            tracing::warn!(subject, "Invalid email subject");
            return vec![RoutingDecision::new(&self.routes.error_queue, Payload::Envelope)];
        }

        let queue = if self.routes.file_queues.iter().any(|q| q == subject) {
            tracing::info!(subject, count = artifacts.len(), "Valid file attachment");
            subject
        } else {
            tracing::warn!(subject, "Attachment subject is not a file queue");
            self.routes.file_error_queue.as_str()
        };

        artifacts
            .into_iter()
            .map(|a| RoutingDecision::new(queue, Payload::Attachment(a)))
            .collect()
    }
}
