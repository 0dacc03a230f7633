//! Config client: fetch, publish, remove and long-poll configuration content.
//!
//! The long-poll listener endpoint speaks a packed wire format: the POST body
//! is `Listening-Configs=` followed by one unit of
//! `dataId \x02 group \x02 md5-hex [\x02 namespace] \x01` per watched entry,
//! sent with the poll timeout in the `Long-Pulling-Timeout` header. A 200
//! with an empty body means nothing changed; a non-empty body names the
//! changed keys and callers fetch the new content with a plain GET.

use std::time::Duration;

use tracing::debug;

use crate::http::{ApiClient, HttpError, CONFIG_ENDPOINT, CONFIG_LISTENER_ENDPOINT};
use crate::watch::{self, ListenOptions, Listener, Subscription};

/// Extra HTTP deadline granted on top of the long-poll timeout, so a healthy
/// long poll is never cut short but a dead connection cannot hang a watcher
/// past its polling round.
const POLL_TIMEOUT_GRACE: Duration = Duration::from_secs(10);

/// Computes the hex digest the listener protocol uses for change detection.
pub(crate) fn content_digest(content: &str) -> String {
    format!("{:x}", md5::compute(content))
}

/// Client for the registry's configuration API.
#[derive(Debug, Clone)]
pub struct ConfigClient {
    api: ApiClient,
}

impl ConfigClient {
    /// Wraps an [`ApiClient`] for configuration operations.
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Fetches the current content of one configuration entry.
    pub async fn get_config(
        &self,
        namespace: &str,
        group: &str,
        data_id: &str,
    ) -> Result<String, HttpError> {
        let request = self.api.get(CONFIG_ENDPOINT).query(&[
            ("tenant", namespace),
            ("dataId", data_id),
            ("group", group),
        ]);
        let response = self.api.dispatch(request).await?;
        Ok(response.text().await?)
    }

    /// Publishes (creates or overwrites) one configuration entry.
    ///
    /// `config_type` is an optional content-type tag such as `yaml` or
    /// `properties`; the server stores it alongside the content.
    pub async fn publish_config(
        &self,
        namespace: &str,
        group: &str,
        data_id: &str,
        content: &str,
        config_type: Option<&str>,
    ) -> Result<(), HttpError> {
        let mut form: Vec<(&str, &str)> = vec![
            ("tenant", namespace),
            ("dataId", data_id),
            ("group", group),
            ("content", content),
        ];
        if let Some(config_type) = config_type {
            form.push(("type", config_type));
        }
        let request = self.api.post(CONFIG_ENDPOINT).form(&form);
        self.api.dispatch_expecting(request, "true").await
    }

    /// Removes one configuration entry.
    pub async fn remove_config(
        &self,
        namespace: &str,
        group: &str,
        data_id: &str,
    ) -> Result<(), HttpError> {
        let request = self.api.delete(CONFIG_ENDPOINT).query(&[
            ("tenant", namespace),
            ("dataId", data_id),
            ("group", group),
        ]);
        self.api.dispatch_expecting(request, "true").await
    }

    /// Runs one long-poll round for a single watched entry.
    ///
    /// Blocks until the server answers, which it does immediately when the
    /// digest is stale and after up to `timeout` otherwise. Returns `true`
    /// when the entry changed and the caller should fetch the new content.
    pub async fn poll_change(
        &self,
        namespace: &str,
        group: &str,
        data_id: &str,
        digest: &str,
        timeout: Duration,
    ) -> Result<bool, HttpError> {
        // Separators are raw bytes, not urlencoded: \x02 between fields,
        // \x01 terminating the unit. The namespace field is present only
        // when a namespace is set.
        let unit = if namespace.is_empty() {
            format!("{data_id}\x02{group}\x02{digest}\x01")
        } else {
            format!("{data_id}\x02{group}\x02{digest}\x02{namespace}\x01")
        };
        let body = format!("Listening-Configs={unit}");

        let request = self
            .api
            .post(CONFIG_LISTENER_ENDPOINT)
            .header("Long-Pulling-Timeout", timeout.as_millis().to_string())
            .header("Content-Type", "application/x-www-form-urlencoded")
            .timeout(timeout + POLL_TIMEOUT_GRACE)
            .body(body);
        let response = self.api.dispatch(request).await?;
        let changed_keys = response.text().await?;
        if changed_keys.is_empty() {
            return Ok(false);
        }
        debug!(data_id, group, changed_keys = %changed_keys, "config change signalled");
        Ok(true)
    }

    /// Starts a watcher streaming change and error events for one entry.
    ///
    /// The watcher long-polls independently until [`Listener::stop`] is
    /// called or the listener is dropped.
    pub fn listen(
        &self,
        namespace: impl Into<String>,
        group: impl Into<String>,
        data_id: impl Into<String>,
        options: ListenOptions,
    ) -> Listener {
        let subscription = Subscription {
            namespace: namespace.into(),
            group: group.into(),
            data_id: data_id.into(),
        };
        watch::spawn_watcher(self.clone(), subscription, options)
    }
}
