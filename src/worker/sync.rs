//! Background replication of writes queued while offline.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use tracing::{debug, info, warn};

use super::OfflineWorker;
use crate::net::Request;
use crate::queue::PendingMutation;

/// Outcome of one sync run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
  pub attempted: usize,
  /// Replayed and removed from the queue
  pub synced: Vec<i64>,
  /// Still queued for the next sync
  pub failed: Vec<i64>,
}

impl OfflineWorker {
  /// Handle a sync event.
  ///
  /// Only the configured tag triggers replication; any other tag is ignored
  /// and yields `None`. Pending mutations are replayed one at a time, oldest
  /// first. A failure is logged and recorded on that item, never propagated,
  /// and the next item is still sent.
  pub async fn sync(&self, tag: &str) -> Result<Option<SyncReport>> {
    if tag != self.settings.sync_tag {
      debug!(tag, "Ignoring unknown sync tag");
      return Ok(None);
    }

    let pending = self.ctx.queue.pending()?;
    if pending.is_empty() {
      debug!(tag, "Nothing to replicate");
      return Ok(Some(SyncReport::default()));
    }

    info!(tag, count = pending.len(), "Replicating pending mutations");
    let mut report = SyncReport {
      attempted: pending.len(),
      ..SyncReport::default()
    };

    // Strictly one at a time, in queue order
    for mutation in &pending {
      let result = self.replay(mutation).await;
      match result.and_then(|()| self.ctx.queue.mark_synced(mutation.id)) {
        Ok(()) => {
          debug!(mutation_id = mutation.id, target = %mutation.target, "Mutation synced");
          report.synced.push(mutation.id);
        }
        Err(e) => {
          warn!(
            mutation_id = mutation.id,
            target = %mutation.target,
            attempts = mutation.attempts + 1,
            error = %e,
            "Replay failed, keeping mutation queued"
          );
          if let Err(record_err) = self.ctx.queue.record_failure(mutation.id, &e.to_string()) {
            warn!(
              mutation_id = mutation.id,
              error = %record_err,
              "Failed to record replay failure"
            );
          }
          report.failed.push(mutation.id);
        }
      }
    }

    info!(
      synced = report.synced.len(),
      failed = report.failed.len(),
      "Replication finished"
    );
    Ok(Some(report))
  }

  /// Send one queued write to the backend. Any non-2xx answer is a failure.
  async fn replay(&self, mutation: &PendingMutation) -> Result<()> {
    let method = Method::from_bytes(mutation.method.as_bytes())
      .map_err(|_| eyre!("Invalid method '{}'", mutation.method))?;
    let url = self
      .settings
      .origin
      .join(&mutation.target)
      .map_err(|e| eyre!("Invalid target '{}': {}", mutation.target, e))?;

    let mut request = Request::new(method, url).with_body(mutation.payload.clone());
    if let Some(ref content_type) = mutation.content_type {
      request = request.with_header("Content-Type", content_type.as_str());
    }

    let response = self.ctx.fetcher.fetch(&request).await?;
    if !response.is_ok() {
      return Err(eyre!("Backend answered HTTP {}", response.status));
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::{FetchError, Response};
  use crate::queue::{MutationQueue, NewMutation};
  use crate::worker::testing::{Harness, ScriptedFetcher};
  use std::time::Duration;

  #[tokio::test]
  async fn test_partial_failure_is_isolated() {
    let fetcher = ScriptedFetcher::new()
      .respond("/api/documents/1", Response::new(200, "ok"))
      .fail("/api/documents/2", FetchError::Network("connection reset".to_string()))
      .respond("/api/documents/3", Response::new(201, "created"));
    let h = Harness::new(fetcher);

    let first = h.queue.enqueue(NewMutation::json("PUT", "/api/documents/1", "{}")).unwrap();
    let second = h.queue.enqueue(NewMutation::json("PUT", "/api/documents/2", "{}")).unwrap();
    let third = h.queue.enqueue(NewMutation::json("PUT", "/api/documents/3", "{}")).unwrap();

    let report = h.worker.sync("sync-documents").await.unwrap().unwrap();

    assert_eq!(report.attempted, 3);
    assert_eq!(report.synced, vec![first.id, third.id]);
    assert_eq!(report.failed, vec![second.id]);

    let calls = h.fetcher.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls.contains(&"PUT http://localhost:1420/api/documents/3".to_string()));

    let remaining = h.queue.pending().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, second.id);
    assert_eq!(remaining[0].attempts, 1);
    assert!(remaining[0].last_error.as_deref().unwrap().contains("connection reset"));
  }

  #[tokio::test]
  async fn test_replay_preserves_queue_order() {
    let fetcher = ScriptedFetcher::new()
      .respond("/api/documents/7", Response::new(201, "created"))
      .delay("POST", "/api/documents/7", Duration::from_millis(50));
    let h = Harness::new(fetcher);
    h.queue.enqueue(NewMutation::json("POST", "/api/documents/7", "{}")).unwrap();
    h.queue.enqueue(NewMutation::json("PUT", "/api/documents/7", "{}")).unwrap();
    h.queue.enqueue(NewMutation::json("DELETE", "/api/documents/7", "")).unwrap();

    let report = h.worker.sync("sync-documents").await.unwrap().unwrap();

    assert_eq!(report.synced.len(), 3);
    assert_eq!(
      h.fetcher.completed(),
      vec![
        "POST http://localhost:1420/api/documents/7",
        "PUT http://localhost:1420/api/documents/7",
        "DELETE http://localhost:1420/api/documents/7",
      ]
    );
  }

  #[tokio::test]
  async fn test_server_rejection_keeps_item_queued() {
    let fetcher =
      ScriptedFetcher::new().respond("/api/documents", Response::new(503, "unavailable"));
    let h = Harness::new(fetcher);
    h.queue.enqueue(NewMutation::json("POST", "/api/documents", "{}")).unwrap();

    let report = h.worker.sync("sync-documents").await.unwrap().unwrap();
    assert!(report.synced.is_empty());
    assert_eq!(report.failed.len(), 1);

    // retried on the next trigger, with no limit
    h.worker.sync("sync-documents").await.unwrap();
    assert_eq!(h.queue.pending().unwrap()[0].attempts, 2);
  }

  #[tokio::test]
  async fn test_other_tags_are_ignored() {
    let h = Harness::new(ScriptedFetcher::new());
    h.queue.enqueue(NewMutation::json("POST", "/api/documents", "{}")).unwrap();

    assert!(h.worker.sync("sync-settings").await.unwrap().is_none());
    assert!(h.fetcher.calls().is_empty());
    assert_eq!(h.queue.pending().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_replay_sends_payload_and_content_type() {
    let fetcher = ScriptedFetcher::new().respond("/api/documents", Response::new(200, ""));
    let h = Harness::new(fetcher);
    h.queue.enqueue(NewMutation::json("POST", "/api/documents", "{\"name\":\"a.pdf\"}")).unwrap();

    let report = h.worker.sync("sync-documents").await.unwrap().unwrap();
    assert_eq!(report.synced.len(), 1);
    assert_eq!(h.fetcher.calls(), vec!["POST http://localhost:1420/api/documents"]);
    assert!(h.queue.pending().unwrap().is_empty());

    let requests = h.fetcher.requests();
    let sent = &requests[0];
    assert_eq!(sent.body.as_deref(), Some(&b"{\"name\":\"a.pdf\"}"[..]));
    assert!(sent
      .headers
      .contains(&("Content-Type".to_string(), "application/json".to_string())));
  }

  #[tokio::test]
  async fn test_invalid_method_fails_only_that_item() {
    let fetcher = ScriptedFetcher::new().respond("/api/documents", Response::new(200, ""));
    let h = Harness::new(fetcher);
    h.queue.enqueue(NewMutation::json("NOT A METHOD", "/api/documents", "")).unwrap();
    h.queue.enqueue(NewMutation::json("POST", "/api/documents", "")).unwrap();

    let report = h.worker.sync("sync-documents").await.unwrap().unwrap();
    assert_eq!(report.synced.len(), 1);
    assert_eq!(report.failed.len(), 1);
  }
}
