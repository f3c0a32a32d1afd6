//! The browser callback channel: the strictly-ordered request/response
//! conduit between the engine and the external browser collaborator.
//!
//! Every user-facing effect travels through here as one of a closed set of
//! message kinds. The executor suspends exactly at each reply-requiring
//! request until the browser answers; fire-and-forget messages only
//! acknowledge delivery. One channel per DeBot instance: cross-instance
//! notifications interleave freely, within one instance they never reorder.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::action::DebotAction;
use crate::activity::DebotActivity;
use crate::errors::{DebotError, DebotResult};
use crate::signing::SigningBoxHandle;

/// Outbound notification from the engine to the browser.
#[derive(Debug, Clone, PartialEq)]
pub enum BrowserMessage {
    /// Print a text message to the user.
    Log { msg: String },
    /// The DeBot switched to another context. `CONTEXT_EXIT` is the finish
    /// sentinel after which the browser may release the instance.
    Switch { context_id: u8 },
    /// The context's action list has been fully announced.
    SwitchCompleted,
    /// One menu entry of the context being entered.
    ShowAction { action: DebotAction },
    /// Ask the user for an input value.
    Input { prompt: String },
    /// Ask the browser for a signing box; ownership of the returned handle
    /// transfers to the engine until the instance is removed.
    GetSigningBox,
    /// Hand control to another DeBot; the reply acknowledges its completion.
    InvokeDebot { debot_addr: String, action: DebotAction },
    /// Deliver a message addressed to a browser-hosted interface.
    Send { message: String },
    /// Ask the user to approve a pending side effect.
    Approve { activity: DebotActivity },
}

impl BrowserMessage {
    /// Whether the protocol requires a typed reply before the engine may
    /// proceed. Determined by the variant, never by the caller.
    pub fn expects_reply(&self) -> bool {
        matches!(
            self,
            BrowserMessage::Input { .. }
                | BrowserMessage::GetSigningBox
                | BrowserMessage::InvokeDebot { .. }
                | BrowserMessage::Approve { .. }
        )
    }

    fn kind(&self) -> &'static str {
        match self {
            BrowserMessage::Log { .. } => "Log",
            BrowserMessage::Switch { .. } => "Switch",
            BrowserMessage::SwitchCompleted => "SwitchCompleted",
            BrowserMessage::ShowAction { .. } => "ShowAction",
            BrowserMessage::Input { .. } => "Input",
            BrowserMessage::GetSigningBox => "GetSigningBox",
            BrowserMessage::InvokeDebot { .. } => "InvokeDebot",
            BrowserMessage::Send { .. } => "Send",
            BrowserMessage::Approve { .. } => "Approve",
        }
    }
}

/// Typed reply to a reply-requiring [`BrowserMessage`].
#[derive(Debug, Clone, PartialEq)]
pub enum BrowserReply {
    Input { value: String },
    SigningBox { handle: SigningBoxHandle },
    InvokeCompleted,
    Approve { approved: bool },
}

impl BrowserReply {
    fn kind(&self) -> &'static str {
        match self {
            BrowserReply::Input { .. } => "Input",
            BrowserReply::SigningBox { .. } => "SigningBox",
            BrowserReply::InvokeCompleted => "InvokeCompleted",
            BrowserReply::Approve { .. } => "Approve",
        }
    }
}

/// One queued request. `reply` is `Some` exactly when the message variant
/// expects a reply; dropping the sender without replying surfaces as
/// `BrowserCallbackFailed` on the engine side.
#[derive(Debug)]
pub struct BrowserRequest {
    pub message: BrowserMessage,
    pub reply: Option<oneshot::Sender<BrowserReply>>,
}

/// Engine-side handle to a per-instance browser queue.
///
/// Requests are delivered in issue order; the executor never has more than
/// one outstanding reply-requiring request per instance.
#[derive(Clone)]
pub struct BrowserChannel {
    tx: mpsc::UnboundedSender<BrowserRequest>,
    reply_timeout: Option<Duration>,
}

impl BrowserChannel {
    /// Create a channel and the receiving end the browser must drain.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BrowserRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                reply_timeout: None,
            },
            rx,
        )
    }

    /// Run a [`BrowserCallbacks`] implementation as the receiving task.
    pub fn from_callbacks(callbacks: Arc<dyn BrowserCallbacks>) -> Self {
        let (channel, mut rx) = Self::new();
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                dispatch_to_callbacks(callbacks.as_ref(), request).await;
            }
        });
        channel
    }

    /// Bound the wait for each reply. `None` waits indefinitely. The engine
    /// applies its configured deadline here when an instance is initialized.
    pub fn with_timeout(mut self, reply_timeout: Option<Duration>) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    /// Fire-and-forget notification. Succeeding means the message was
    /// queued for delivery, nothing more.
    pub fn notify(&self, message: BrowserMessage) -> DebotResult<()> {
        debug_assert!(!message.expects_reply());
        self.tx
            .send(BrowserRequest {
                message,
                reply: None,
            })
            .map_err(|e| {
                DebotError::BrowserCallbackFailed(format!(
                    "browser disconnected before {} was delivered",
                    e.0.message.kind()
                ))
            })
    }

    /// Issue a reply-requiring request and suspend until the browser
    /// answers, errors out, or the configured deadline passes.
    pub async fn request(&self, message: BrowserMessage) -> DebotResult<BrowserReply> {
        debug_assert!(message.expects_reply());
        let kind = message.kind();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(BrowserRequest {
                message,
                reply: Some(reply_tx),
            })
            .map_err(|_| {
                DebotError::BrowserCallbackFailed(format!(
                    "browser disconnected before {kind} was delivered"
                ))
            })?;

        let received = match self.reply_timeout {
            Some(deadline) => tokio::time::timeout(deadline, reply_rx)
                .await
                .map_err(|_| {
                    DebotError::BrowserCallbackFailed(format!(
                        "no reply to {kind} within {deadline:?}"
                    ))
                })?,
            None => reply_rx.await,
        };
        received.map_err(|_| {
            DebotError::BrowserCallbackFailed(format!("browser dropped the reply to {kind}"))
        })
    }

    pub async fn input(&self, prompt: impl Into<String>) -> DebotResult<String> {
        match self
            .request(BrowserMessage::Input {
                prompt: prompt.into(),
            })
            .await?
        {
            BrowserReply::Input { value } => Ok(value),
            other => Err(unexpected_reply("Input", &other)),
        }
    }

    pub async fn get_signing_box(&self) -> DebotResult<SigningBoxHandle> {
        match self.request(BrowserMessage::GetSigningBox).await? {
            BrowserReply::SigningBox { handle } => Ok(handle),
            other => Err(unexpected_reply("GetSigningBox", &other)),
        }
    }

    pub async fn invoke_debot(
        &self,
        debot_addr: impl Into<String>,
        action: DebotAction,
    ) -> DebotResult<()> {
        match self
            .request(BrowserMessage::InvokeDebot {
                debot_addr: debot_addr.into(),
                action,
            })
            .await?
        {
            BrowserReply::InvokeCompleted => Ok(()),
            other => Err(unexpected_reply("InvokeDebot", &other)),
        }
    }

    pub async fn approve(&self, activity: DebotActivity) -> DebotResult<bool> {
        match self.request(BrowserMessage::Approve { activity }).await? {
            BrowserReply::Approve { approved } => Ok(approved),
            other => Err(unexpected_reply("Approve", &other)),
        }
    }
}

fn unexpected_reply(request: &str, reply: &BrowserReply) -> DebotError {
    DebotError::BrowserCallbackFailed(format!(
        "browser answered {request} with a {} reply",
        reply.kind()
    ))
}

/// The browser collaborator contract. All nine callbacks are invoked only by
/// the engine, never unsolicited.
#[async_trait]
pub trait BrowserCallbacks: Send + Sync {
    /// Print a text message to the user.
    async fn log(&self, msg: String);
    /// The DeBot switched to another context.
    async fn switch(&self, context_id: u8);
    /// The context's action list is complete.
    async fn switch_completed(&self);
    /// Announce one action of the context being entered.
    async fn show_action(&self, action: DebotAction);
    /// Ask the user for an input value.
    async fn input(&self, prompt: &str) -> anyhow::Result<String>;
    /// Supply a signing box; ownership of the handle moves to the engine.
    async fn get_signing_box(&self) -> anyhow::Result<SigningBoxHandle>;
    /// Run the given action of another DeBot and return once it finishes.
    async fn invoke_debot(&self, debot_addr: String, action: DebotAction) -> anyhow::Result<()>;
    /// Deliver a message addressed to a browser-hosted interface.
    async fn send(&self, message: String);
    /// Decide whether a pending side effect may proceed.
    async fn approve(&self, activity: DebotActivity) -> anyhow::Result<bool>;
}

async fn dispatch_to_callbacks(callbacks: &dyn BrowserCallbacks, request: BrowserRequest) {
    let BrowserRequest { message, reply } = request;
    match message {
        BrowserMessage::Log { msg } => callbacks.log(msg).await,
        BrowserMessage::Switch { context_id } => callbacks.switch(context_id).await,
        BrowserMessage::SwitchCompleted => callbacks.switch_completed().await,
        BrowserMessage::ShowAction { action } => callbacks.show_action(action).await,
        BrowserMessage::Send { message } => callbacks.send(message).await,
        BrowserMessage::Input { prompt } => {
            send_reply(
                reply,
                callbacks
                    .input(&prompt)
                    .await
                    .map(|value| BrowserReply::Input { value }),
            );
        }
        BrowserMessage::GetSigningBox => {
            send_reply(
                reply,
                callbacks
                    .get_signing_box()
                    .await
                    .map(|handle| BrowserReply::SigningBox { handle }),
            );
        }
        BrowserMessage::InvokeDebot { debot_addr, action } => {
            send_reply(
                reply,
                callbacks
                    .invoke_debot(debot_addr, action)
                    .await
                    .map(|()| BrowserReply::InvokeCompleted),
            );
        }
        BrowserMessage::Approve { activity } => {
            send_reply(
                reply,
                callbacks
                    .approve(activity)
                    .await
                    .map(|approved| BrowserReply::Approve { approved }),
            );
        }
    }
}

/// Forward a collaborator result. An error drops the reply sender so the
/// waiting executor observes `BrowserCallbackFailed`.
fn send_reply(reply: Option<oneshot::Sender<BrowserReply>>, result: anyhow::Result<BrowserReply>) {
    let Some(tx) = reply else {
        debug!("reply produced for a fire-and-forget message, discarding");
        return;
    };
    match result {
        Ok(value) => {
            let _ = tx.send(value);
        }
        Err(e) => {
            debug!(error = %e, "browser callback failed, dropping reply");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notify_queues_in_issue_order() {
        let (channel, mut rx) = BrowserChannel::new();
        channel
            .notify(BrowserMessage::Switch { context_id: 0 })
            .unwrap();
        channel
            .notify(BrowserMessage::Log {
                msg: "hello".to_string(),
            })
            .unwrap();
        channel.notify(BrowserMessage::SwitchCompleted).unwrap();

        assert!(matches!(
            rx.recv().await.unwrap().message,
            BrowserMessage::Switch { context_id: 0 }
        ));
        assert!(matches!(
            rx.recv().await.unwrap().message,
            BrowserMessage::Log { .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap().message,
            BrowserMessage::SwitchCompleted
        ));
    }

    #[tokio::test]
    async fn request_suspends_until_reply() {
        let (channel, mut rx) = BrowserChannel::new();
        let responder = tokio::spawn(async move {
            let request = rx.recv().await.unwrap();
            assert!(matches!(request.message, BrowserMessage::Input { .. }));
            request
                .reply
                .unwrap()
                .send(BrowserReply::Input {
                    value: "0:ABC".to_string(),
                })
                .unwrap();
        });

        let value = channel.input("enter address").await.unwrap();
        assert_eq!(value, "0:ABC");
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn mismatched_reply_kind_is_a_callback_failure() {
        let (channel, mut rx) = BrowserChannel::new();
        tokio::spawn(async move {
            let request = rx.recv().await.unwrap();
            request
                .reply
                .unwrap()
                .send(BrowserReply::Approve { approved: true })
                .unwrap();
        });

        let err = channel.input("prompt").await.unwrap_err();
        assert_eq!(err.code(), 811);
    }

    #[tokio::test]
    async fn dropped_reply_sender_is_a_callback_failure() {
        let (channel, mut rx) = BrowserChannel::new();
        tokio::spawn(async move {
            let request = rx.recv().await.unwrap();
            drop(request.reply);
        });

        let err = channel.get_signing_box().await.unwrap_err();
        assert_eq!(err.code(), 811);
    }

    #[tokio::test]
    async fn disconnected_browser_fails_notify_and_request() {
        let (channel, rx) = BrowserChannel::new();
        drop(rx);

        let err = channel
            .notify(BrowserMessage::Log {
                msg: "lost".to_string(),
            })
            .unwrap_err();
        assert_eq!(err.code(), 811);

        let err = channel.input("prompt").await.unwrap_err();
        assert_eq!(err.code(), 811);
    }

    #[tokio::test]
    async fn reply_timeout_expires_into_callback_failure() {
        let (channel, mut rx) = BrowserChannel::new();
        let channel = channel.with_timeout(Some(Duration::from_millis(20)));
        // Hold the request so the reply sender stays alive without answering.
        let holder = tokio::spawn(async move {
            let _request = rx.recv().await;
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let err = channel.get_signing_box().await.unwrap_err();
        assert_eq!(err.code(), 811);
        assert!(err.to_string().contains("no reply"));
        holder.abort();
    }

    #[tokio::test]
    async fn expects_reply_is_a_property_of_the_variant() {
        assert!(BrowserMessage::GetSigningBox.expects_reply());
        assert!(
            BrowserMessage::Input {
                prompt: String::new()
            }
            .expects_reply()
        );
        assert!(!BrowserMessage::SwitchCompleted.expects_reply());
        assert!(
            !BrowserMessage::Send {
                message: String::new()
            }
            .expects_reply()
        );
    }
}
