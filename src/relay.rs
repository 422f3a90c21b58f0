//! Delivery orchestration: one processing cycle over the backend.
//!
//! Strictly sequential: documents one at a time, rules in declaration
//! order, and for each matching rule render → compose → deliver →
//! processed-tag write before anything else runs. A failing document is
//! logged and skipped; a failure before document iteration fails the cycle.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::backend::types::Document;
use crate::backend::{DocumentBackend, Snapshot};
use crate::config::{Config, RuleConfig};
use crate::error::{BackendError, Result, TransportError};
use crate::mime::{self, RenderedMessage};
use crate::rules::RuleEngine;
use crate::smtp::{Envelope, MailTransport};
use crate::template::{render, RenderContext};

/// Outcome counters for one cycle.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Candidate documents seen.
    pub documents: usize,
    /// Messages delivered (a document can fan out to several rules).
    pub delivered: usize,
    /// Documents whose pipeline failed and were skipped.
    pub failed: usize,
    /// Documents that carried the queue tag but matched no rule.
    pub unmatched: usize,
}

enum DocumentOutcome {
    Delivered(usize),
    Unmatched,
}

/// Per-cycle orchestrator wiring the backend, rule engine, renderer,
/// composer and transport together.
pub struct Relay {
    config: Arc<Config>,
    backend: Arc<dyn DocumentBackend>,
    transport: Arc<dyn MailTransport>,
    engine: RuleEngine,
}

impl Relay {
    pub fn new(
        config: Arc<Config>,
        backend: Arc<dyn DocumentBackend>,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        let engine = RuleEngine::new(config.paperless.rules.clone());
        Self {
            config,
            backend,
            transport,
            engine,
        }
    }

    /// Run one processing cycle.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let snapshot = Snapshot::load(self.backend.as_ref()).await?;

        let queue_tag = snapshot
            .tag_by_name(&self.config.paperless.queue_tag)
            .ok_or_else(|| BackendError::UnknownTag {
                name: self.config.paperless.queue_tag.clone(),
            })?
            .id;
        let processed_tag = snapshot
            .tag_by_name(&self.config.paperless.processed_tag)
            .ok_or_else(|| BackendError::UnknownTag {
                name: self.config.paperless.processed_tag.clone(),
            })?
            .id;

        let documents = self
            .backend
            .documents_tagged(queue_tag, processed_tag)
            .await?;
        if documents.is_empty() {
            info!("No documents queued for delivery");
            return Ok(CycleReport::default());
        }

        let mut report = CycleReport {
            documents: documents.len(),
            ..CycleReport::default()
        };
        for document in &documents {
            match self
                .process_document(document, &snapshot, processed_tag)
                .await
            {
                Ok(DocumentOutcome::Delivered(count)) => report.delivered += count,
                Ok(DocumentOutcome::Unmatched) => report.unmatched += 1,
                Err(e) => {
                    warn!(
                        document_id = document.id,
                        title = %document.title,
                        error = %e,
                        "Document pipeline failed; continuing with next document"
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            documents = report.documents,
            delivered = report.delivered,
            failed = report.failed,
            unmatched = report.unmatched,
            "Cycle complete"
        );
        Ok(report)
    }

    async fn process_document(
        &self,
        document: &Document,
        snapshot: &Snapshot,
        processed_tag: i64,
    ) -> Result<DocumentOutcome> {
        let matched = self.engine.matching(document, snapshot);
        if matched.is_empty() {
            // Left untagged so a future cycle (with new rules) can pick it up.
            info!(
                document_id = document.id,
                title = %document.title,
                "Document carries the queue tag but matches no rule"
            );
            return Ok(DocumentOutcome::Unmatched);
        }

        let attachment = self
            .backend
            .download(document.id, self.config.paperless.download_original)
            .await?;
        info!(
            document_id = document.id,
            bytes = attachment.len(),
            "Downloaded document binary"
        );

        let mut delivered = 0;
        for rule in matched {
            let message = self.render_message(rule, document, snapshot, attachment.clone());
            self.deliver(&message).await?;
            info!(
                document_id = document.id,
                rule = %rule.name,
                recipients = message.recipients.len(),
                "Document delivered"
            );
            self.backend.add_tag(&[document.id], processed_tag).await?;
            delivered += 1;
        }
        Ok(DocumentOutcome::Delivered(delivered))
    }

    fn render_message(
        &self,
        rule: &RuleConfig,
        document: &Document,
        snapshot: &Snapshot,
        attachment: Vec<u8>,
    ) -> RenderedMessage {
        let ctx = RenderContext {
            document,
            snapshot,
            instance_url: &self.config.paperless.instance_url,
            use_custom_filename: self.config.paperless.use_custom_filename,
        };

        let subject = render(&self.config.email.subject, rule.subject.as_deref(), &ctx);
        let body = render(&self.config.email.body, rule.body.as_deref(), &ctx);
        for token in subject.unresolved.iter().chain(body.unresolved.iter()) {
            warn!(
                document_id = document.id,
                rule = %rule.name,
                token,
                "Template token left unresolved (lookup miss)"
            );
        }

        RenderedMessage {
            subject: subject.text,
            body: body.text,
            attachment_name: document.file_name(self.config.paperless.use_custom_filename),
            attachment,
            recipients: rule.recipients.clone(),
            bcc: rule.bcc.clone(),
        }
    }

    /// Compose and hand off to the blocking SMTP transport.
    async fn deliver(&self, message: &RenderedMessage) -> Result<()> {
        let bytes = mime::compose(&self.config.email.from_address, message, Utc::now());
        let envelope = Envelope {
            from: self.config.email.from_address.clone(),
            to: message.recipients.clone(),
            bcc: message.bcc.clone(),
        };

        let transport = Arc::clone(&self.transport);
        let result = tokio::task::spawn_blocking(move || transport.deliver(&envelope, &bytes))
            .await
            .map_err(|e| TransportError::Io(std::io::Error::other(e)))?;
        result?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::backend::types::{Correspondent, DocumentType, StoragePath, Tag, User};
    use crate::error::{BackendError, Error};

    // ── Fakes ───────────────────────────────────────────────────────

    #[derive(Default)]
    struct FakeBackend {
        tags: Vec<Tag>,
        documents: Vec<Document>,
        binary: Vec<u8>,
        fail_listing: bool,
        tag_writes: Mutex<Vec<(Vec<i64>, i64)>>,
        downloads: Mutex<Vec<(i64, bool)>>,
    }

    #[async_trait]
    impl DocumentBackend for FakeBackend {
        async fn list_tags(&self) -> Result<Vec<Tag>, BackendError> {
            if self.fail_listing {
                return Err(BackendError::Status {
                    endpoint: "tags".into(),
                    status: 503,
                });
            }
            Ok(self.tags.clone())
        }
        async fn list_correspondents(&self) -> Result<Vec<Correspondent>, BackendError> {
            Ok(vec![])
        }
        async fn list_document_types(&self) -> Result<Vec<DocumentType>, BackendError> {
            Ok(vec![])
        }
        async fn list_storage_paths(&self) -> Result<Vec<StoragePath>, BackendError> {
            Ok(vec![])
        }
        async fn list_users(&self) -> Result<Vec<User>, BackendError> {
            Ok(vec![])
        }
        async fn documents_tagged(
            &self,
            _with_tag: i64,
            _without_tag: i64,
        ) -> Result<Vec<Document>, BackendError> {
            Ok(self.documents.clone())
        }
        async fn download(
            &self,
            document_id: i64,
            original: bool,
        ) -> Result<Vec<u8>, BackendError> {
            self.downloads.lock().unwrap().push((document_id, original));
            Ok(self.binary.clone())
        }
        async fn add_tag(&self, document_ids: &[i64], tag_id: i64) -> Result<(), BackendError> {
            self.tag_writes
                .lock()
                .unwrap()
                .push((document_ids.to_vec(), tag_id));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(Envelope, Vec<u8>)>>,
        fail: bool,
    }

    impl MailTransport for RecordingTransport {
        fn deliver(&self, envelope: &Envelope, message: &[u8]) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::RecipientRejected {
                    address: envelope.to[0].clone(),
                    reply: "550 no".into(),
                });
            }
            self.sent
                .lock()
                .unwrap()
                .push((envelope.clone(), message.to_vec()));
            Ok(())
        }
    }

    // ── Fixtures ────────────────────────────────────────────────────

    fn config(extra_rule: bool) -> Arc<Config> {
        let second = if extra_rule {
            "\n    - name: \"Archive\"\n      tags: [\"invoice\"]\n      recipients: [\"archive@example.com\"]"
        } else {
            ""
        };
        let yaml = format!(
            r#"
paperless:
  instance_url: "https://docs.example.com/"
  token: "secret"
  queue_tag: "outbox"
  processed_tag: "sent"
  rules:
    - name: "Accounting"
      tags: ["invoice"]
      recipients: ["ap@example.com"]{second}
email:
  from_address: "relay@example.com"
  server: "smtp.example.com"
  port: 465
  connection_type: tls
  username: "relay"
  password: "hunter2"
  subject: "Document %document_id%"
  body: "<p>Document %document_id%: %document_title%</p>"
run_every_minutes: -1
"#
        );
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        config.validate().unwrap();
        Arc::new(config)
    }

    fn backend(with_invoice_doc: bool) -> FakeBackend {
        let tags = vec![
            Tag {
                id: 1,
                name: "outbox".into(),
            },
            Tag {
                id: 2,
                name: "sent".into(),
            },
            Tag {
                id: 3,
                name: "invoice".into(),
            },
        ];
        let tag_ids = if with_invoice_doc {
            vec![1, 3]
        } else {
            vec![1]
        };
        let documents = vec![serde_json::from_value(serde_json::json!({
            "id": 42,
            "title": "Invoice 2024-07",
            "archived_file_name": "invoice.pdf",
            "tags": tag_ids,
        }))
        .unwrap()];
        FakeBackend {
            tags,
            documents,
            binary: b"%PDF-1.7 fake".to_vec(),
            ..FakeBackend::default()
        }
    }

    // ── Scenarios ───────────────────────────────────────────────────

    #[tokio::test]
    async fn delivers_matching_document_and_writes_processed_tag() {
        let backend = Arc::new(backend(true));
        let transport = Arc::new(RecordingTransport::default());
        let relay = Relay::new(config(false), backend.clone(), transport.clone());

        let report = relay.run_cycle().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 0);

        let sent = transport.sent.lock().unwrap();
        let (envelope, message) = &sent[0];
        assert_eq!(envelope.to, vec!["ap@example.com"]);
        let text = String::from_utf8(message.clone()).unwrap();
        assert!(text.starts_with("From: relay@example.com\r\n"));
        assert!(text.contains("To: ap@example.com\r\n"));
        assert!(text.contains("Subject: =?UTF-8?Q?Document=2042?="));
        assert!(text.contains("Date: "));
        assert!(text.contains("filename=\"invoice.pdf\""));
        // body rendered %document_id%
        assert!(text.contains("Document 42: Invoice 2024-07"));

        // processed tag (id 2) written for document 42
        assert_eq!(*backend.tag_writes.lock().unwrap(), vec![(vec![42], 2)]);
        assert_eq!(*backend.downloads.lock().unwrap(), vec![(42, false)]);
    }

    #[tokio::test]
    async fn unmatched_document_completes_without_tag_write() {
        let backend = Arc::new(backend(false));
        let transport = Arc::new(RecordingTransport::default());
        let relay = Relay::new(config(false), backend.clone(), transport.clone());

        let report = relay.run_cycle().await.unwrap();
        assert_eq!(report.unmatched, 1);
        assert_eq!(report.delivered, 0);
        assert!(transport.sent.lock().unwrap().is_empty());
        assert!(backend.tag_writes.lock().unwrap().is_empty());
        // the binary is never downloaded for an unmatched document
        assert!(backend.downloads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transport_failure_skips_tag_write_and_continues() {
        let backend = Arc::new(backend(true));
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..RecordingTransport::default()
        });
        let relay = Relay::new(config(false), backend.clone(), transport);

        let report = relay.run_cycle().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered, 0);
        assert!(backend.tag_writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn matching_rules_all_fan_out() {
        let backend = Arc::new(backend(true));
        let transport = Arc::new(RecordingTransport::default());
        let relay = Relay::new(config(true), backend.clone(), transport.clone());

        let report = relay.run_cycle().await.unwrap();
        assert_eq!(report.delivered, 2);

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0.to, vec!["ap@example.com"]);
        assert_eq!(sent[1].0.to, vec!["archive@example.com"]);
        // one idempotent tag write per delivered rule
        assert_eq!(backend.tag_writes.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn listing_failure_aborts_the_cycle() {
        let backend = Arc::new(FakeBackend {
            fail_listing: true,
            ..backend(true)
        });
        let transport = Arc::new(RecordingTransport::default());
        let relay = Relay::new(config(false), backend, transport);

        assert!(relay.run_cycle().await.is_err());
    }

    #[tokio::test]
    async fn unknown_queue_tag_aborts_the_cycle() {
        let backend = Arc::new(FakeBackend {
            tags: vec![Tag {
                id: 2,
                name: "sent".into(),
            }],
            ..backend(true)
        });
        let transport = Arc::new(RecordingTransport::default());
        let relay = Relay::new(config(false), backend, transport);

        let err = relay.run_cycle().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Backend(BackendError::UnknownTag { ref name }) if name == "outbox"
        ));
    }
}
