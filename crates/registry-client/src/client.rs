//! The public client handle.
//!
//! `RegistryClient::open` drives version negotiation and the session
//! handshake on the raw stream, then splits it into a writer task and the
//! receive loop and hands back a cloneable handle. Every remote operation
//! is a synchronous call with a bounded wait; notifications arrive on
//! listeners registered through `add_notification_listener`.

use std::sync::Arc;

use registry_core::ObjectRef;
use registry_protocol::{MessageType, Param, ParamTag};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::calls::ClientShared;
use crate::config::ClientConfig;
use crate::correlation::{CorrelationTable, Expect};
use crate::dispatch::run_receive_loop;
use crate::error::RemoteError;
use crate::framing::write_prefixed;
use crate::negotiate::establish;
use crate::subscriptions::{NotificationListener, Subscription, SubscriptionTable};

/// A connected client session. Cloning is cheap; clones share the channel.
#[derive(Clone)]
pub struct RegistryClient {
    shared: Arc<ClientShared>,
    session_id: String,
    version: u8,
}

impl std::fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryClient")
            .field("session_id", &self.session_id)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl RegistryClient {
    /// Negotiate, handshake and start the channel tasks over an
    /// already-open bidirectional stream.
    pub async fn open<S>(mut stream: S, config: ClientConfig) -> Result<Self, RemoteError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let handshake_timeout = config.handshake_timeout;
        let negotiated = tokio::time::timeout(handshake_timeout, establish(&mut stream, &config))
            .await
            .map_err(|_| RemoteError::Timeout {
                elapsed: handshake_timeout,
            })??;
        debug!(
            version = negotiated.version,
            session = %negotiated.session_id,
            "session established"
        );

        let (reader, writer) = tokio::io::split(stream);
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(ClientShared {
            correlation: CorrelationTable::new(),
            subscriptions: SubscriptionTable::new(),
            writer_tx,
            config,
        });

        tokio::spawn(run_writer(writer, writer_rx));
        tokio::spawn(run_receive_loop(reader, shared.clone()));

        Ok(RegistryClient {
            shared,
            session_id: negotiated.session_id,
            version: negotiated.version,
        })
    }

    /// Session id the server issued at `Begin`.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Negotiated protocol version.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Read one attribute, returning its serialized value.
    pub async fn get_attribute(
        &self,
        object: &ObjectRef,
        attribute: &str,
    ) -> Result<Vec<u8>, RemoteError> {
        let result = self
            .shared
            .call(
                MessageType::GetAttribute,
                vec![
                    Param::String(object.to_string()),
                    Param::String(attribute.to_string()),
                ],
                Expect::Value(ParamTag::Object),
            )
            .await?;
        match result {
            Some(Param::Object(bytes)) => Ok(bytes),
            _ => unreachable!("call engine validated the result tag"),
        }
    }

    /// Write one attribute from a serialized value.
    pub async fn set_attribute(
        &self,
        object: &ObjectRef,
        attribute: &str,
        value: &[u8],
    ) -> Result<(), RemoteError> {
        self.shared
            .call(
                MessageType::SetAttribute,
                vec![
                    Param::String(object.to_string()),
                    Param::String(attribute.to_string()),
                    Param::Object(value.to_vec()),
                ],
                Expect::Void,
            )
            .await?;
        Ok(())
    }

    /// Invoke a named method; `None` means the method returned void.
    pub async fn invoke(
        &self,
        object: &ObjectRef,
        method: &str,
        args: &[Vec<u8>],
        signature: &[String],
    ) -> Result<Option<Vec<u8>>, RemoteError> {
        let mut params = vec![
            Param::String(object.to_string()),
            Param::String(method.to_string()),
            Param::StringArray(signature.to_vec()),
        ];
        params.extend(args.iter().map(|a| Param::Object(a.clone())));

        let result = self
            .shared
            .call(MessageType::Invoke, params, Expect::Optional(ParamTag::Object))
            .await?;
        match result {
            Some(Param::Object(bytes)) => Ok(Some(bytes)),
            None => Ok(None),
            _ => unreachable!("call engine validated the result tag"),
        }
    }

    /// List object names matching an opaque filter (`None` = all).
    pub async fn query_names(&self, filter: Option<&[u8]>) -> Result<Vec<String>, RemoteError> {
        let result = self
            .shared
            .call(
                MessageType::QueryNames,
                vec![Param::Object(filter.unwrap_or_default().to_vec())],
                Expect::Value(ParamTag::StringArray),
            )
            .await?;
        match result {
            Some(Param::StringArray(names)) => Ok(names),
            _ => unreachable!("call engine validated the result tag"),
        }
    }

    /// Register a notification listener and return its subscription id.
    ///
    /// The handback is echoed verbatim with every delivered event. If the
    /// remote registration fails, the local entry is rolled back and no
    /// event will ever reach the listener.
    pub async fn add_notification_listener(
        &self,
        object: &ObjectRef,
        filter: Option<Vec<u8>>,
        handback: Vec<u8>,
        listener: NotificationListener,
    ) -> Result<i32, RemoteError> {
        let id = self.shared.subscriptions.insert(Subscription {
            object: object.clone(),
            filter: filter.clone(),
            listener,
        });

        let call = self
            .shared
            .call(
                MessageType::AddListener,
                vec![
                    Param::String(object.to_string()),
                    Param::Integer(id),
                    Param::Object(filter.unwrap_or_default()),
                    Param::Object(handback),
                ],
                Expect::Void,
            )
            .await;

        match call {
            Ok(_) => Ok(id),
            Err(e) => {
                self.shared.subscriptions.remove(id);
                Err(e)
            }
        }
    }

    /// Drop a subscription. The local entry goes first, so no event is
    /// delivered after this returns; the server-side removal is idempotent.
    pub async fn remove_notification_listener(&self, id: i32) -> Result<(), RemoteError> {
        self.shared.subscriptions.remove(id);
        self.shared
            .call(
                MessageType::RemoveListener,
                vec![Param::Integer(id)],
                Expect::Void,
            )
            .await?;
        Ok(())
    }

    /// Send the channel goodbye. The server closes the stream, which in
    /// turn tears down the receive loop and cancels anything still pending.
    pub fn close(&self) {
        self.shared.send_oneway(MessageType::Terminate, vec![]);
    }

    /// Number of calls currently awaiting a response (test observability).
    pub fn pending_call_count(&self) -> usize {
        self.shared.correlation.pending_count()
    }

    /// Number of live local subscriptions (test observability).
    pub fn subscription_count(&self) -> usize {
        self.shared.subscriptions.len()
    }
}

async fn run_writer<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Vec<u8>>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(body) = rx.recv().await {
        if let Err(e) = write_prefixed(&mut writer, &body).await {
            error!(error = %e, "write failed; stopping writer");
            break;
        }
    }
    let _ = writer.shutdown().await;
}
