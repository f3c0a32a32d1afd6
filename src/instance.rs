//! DeBot instances and the per-instance action executor.
//!
//! One instance is one loaded bot: its contract address, parsed ABI,
//! metadata snapshot, current context, and pending action queue. All
//! context/queue mutation happens here, driven by the engine's `start`/
//! `execute`/`send` operations, and every user-facing effect goes through
//! the instance's browser channel in strict issue order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::action::{ActionAttributes, ActionType, DebotAction};
use crate::activity::DebotActivity;
use crate::browser::{BrowserChannel, BrowserMessage};
use crate::errors::{DebotError, DebotResult};
use crate::info::{CONTEXT_CURRENT, CONTEXT_EXIT, CONTEXT_PREV, CONTEXT_ZERO, DContext, DebotInfo};
use crate::services::{MessageDispatcher, MethodRunner};
use crate::signing::{SigningBoxHandle, SigningBoxRegistry};

/// Executor states. `Removed` is not listed: it is carried by the shared
/// flag so removal can be observed without taking the instance lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    ContextEntered,
    ActionsEnumerated,
    ActionRunning,
}

/// State readable without the instance lock: the removal flag and the
/// signing boxes whose ownership was delegated to this instance. `remove`
/// flips the flag and drains the boxes while an operation may still be
/// suspended inside the instance awaiting a browser reply.
#[derive(Default)]
pub(crate) struct InstanceShared {
    removed: AtomicBool,
    owned_boxes: StdMutex<Vec<SigningBoxHandle>>,
}

impl InstanceShared {
    pub(crate) fn mark_removed(&self) {
        self.removed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }

    fn claim_box(&self, handle: SigningBoxHandle) {
        self.owned_boxes.lock().unwrap().push(handle);
    }

    pub(crate) fn drain_boxes(&self) -> Vec<SigningBoxHandle> {
        std::mem::take(&mut *self.owned_boxes.lock().unwrap())
    }
}

/// Internal executor control flow: a step either fails with an engine error
/// or is interrupted because the instance was removed while suspended. An
/// interrupt discards the in-flight completion quietly.
enum Interrupt {
    Removed,
    Failed(DebotError),
}

impl From<DebotError> for Interrupt {
    fn from(e: DebotError) -> Self {
        Interrupt::Failed(e)
    }
}

type StepResult<T> = Result<T, Interrupt>;

pub struct DebotInstance {
    addr: String,
    abi: serde_json::Value,
    info: DebotInfo,
    contexts: Vec<DContext>,
    current_context: u8,
    prev_context: u8,
    state: RunState,
    /// Actions currently executable: the entered context's menu plus any
    /// non-instant follow-ups produced by the bot.
    action_queue: VecDeque<DebotAction>,
    /// Signing box delegated to this instance, if any.
    signing_box: Option<SigningBoxHandle>,
    browser: BrowserChannel,
    shared: Arc<InstanceShared>,
    runner: Arc<dyn MethodRunner>,
    dispatcher: Arc<dyn MessageDispatcher>,
    signing: Arc<SigningBoxRegistry>,
    max_chain_steps: usize,
}

impl DebotInstance {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        addr: String,
        abi: serde_json::Value,
        info: DebotInfo,
        contexts: Vec<DContext>,
        browser: BrowserChannel,
        shared: Arc<InstanceShared>,
        runner: Arc<dyn MethodRunner>,
        dispatcher: Arc<dyn MessageDispatcher>,
        signing: Arc<SigningBoxRegistry>,
        max_chain_steps: usize,
    ) -> Self {
        Self {
            addr,
            abi,
            info,
            contexts,
            current_context: CONTEXT_ZERO,
            prev_context: CONTEXT_ZERO,
            state: RunState::Idle,
            action_queue: VecDeque::new(),
            signing_box: None,
            browser,
            shared,
            runner,
            dispatcher,
            signing,
            max_chain_steps,
        }
    }

    pub fn address(&self) -> &str {
        &self.addr
    }

    pub fn info(&self) -> &DebotInfo {
        &self.info
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Drive the entry context through the full switch/enumerate sequence
    /// and run its `instant` chain.
    pub(crate) async fn start(&mut self) -> DebotResult<()> {
        if self.state != RunState::Idle {
            return Err(DebotError::ExecutionFailed(
                "debot has already been started".to_string(),
            ));
        }
        self.run(VecDeque::new(), Some(CONTEXT_ZERO)).await
    }

    /// Execute one action selected by the caller. The action must be part
    /// of the currently-enumerated surface; attributes and payloads are
    /// validated before any browser notification goes out.
    pub(crate) async fn execute(&mut self, action: DebotAction) -> DebotResult<()> {
        action.kind()?;
        action.parse_attributes()?;
        let known = self
            .action_queue
            .iter()
            .any(|a| a.name == action.name && a.action_type == action.action_type);
        if !known {
            return Err(DebotError::InvalidFunctionId(format!(
                "action '{}' is not part of the current context",
                action.name
            )));
        }
        self.run(VecDeque::from([action]), None).await
    }

    /// Route an inbound interface message into the instance without
    /// changing context.
    pub(crate) async fn send(&mut self, message: &str) -> DebotResult<()> {
        let raw = BASE64
            .decode(message)
            .map_err(|e| DebotError::InvalidMessage(format!("not valid base64: {e}")))?;
        let envelope: serde_json::Value = serde_json::from_slice(&raw)
            .map_err(|e| DebotError::InvalidMessage(format!("not a JSON envelope: {e}")))?;
        let dest = envelope
            .get("dest")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                DebotError::InvalidMessage("envelope has no destination".to_string())
            })?;
        if !self.info.interfaces.iter().any(|i| i == dest) {
            return Err(DebotError::InvalidMessage(format!(
                "'{dest}' is not an interface this debot declares"
            )));
        }
        let method = envelope
            .get("method")
            .and_then(|v| v.as_str())
            .filter(|m| !m.is_empty())
            .ok_or_else(|| {
                DebotError::InvalidFunctionId("envelope names no method".to_string())
            })?
            .to_string();
        let params = envelope
            .get("params")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));

        let result = self.send_inner(&method, &params).await;
        self.absorb(result)
    }

    async fn send_inner(
        &mut self,
        method: &str,
        params: &serde_json::Value,
    ) -> StepResult<()> {
        let result = self.call_method(method, params).await?;
        let produced = self.process_output(result, true).await?;
        let chain = self.split_chain(produced);
        self.run_chain(chain, None).await
    }

    /// Run an action chain and, optionally, an initial context entry.
    /// Maps a mid-operation removal to a quiet `Ok`: a late reply never
    /// resurrects a removed instance.
    async fn run(
        &mut self,
        pending: VecDeque<DebotAction>,
        enter: Option<u8>,
    ) -> DebotResult<()> {
        let result = self.run_chain(pending, enter).await;
        self.absorb(result)
    }

    fn absorb(&self, result: StepResult<()>) -> DebotResult<()> {
        match result {
            Ok(()) => Ok(()),
            Err(Interrupt::Removed) => {
                debug!(addr = %self.addr, "instance removed mid-operation, reply discarded");
                Ok(())
            }
            Err(Interrupt::Failed(e)) => Err(e),
        }
    }

    async fn run_chain(
        &mut self,
        mut pending: VecDeque<DebotAction>,
        enter: Option<u8>,
    ) -> StepResult<()> {
        if let Some(context_id) = enter {
            let chain = self.enter_context(context_id).await?;
            pending.extend(chain);
        }
        let mut steps = 0usize;
        while let Some(action) = pending.pop_front() {
            self.ensure_live()?;
            steps += 1;
            if steps > self.max_chain_steps {
                return Err(DebotError::ExecutionFailed(format!(
                    "action chain exceeded {} steps",
                    self.max_chain_steps
                ))
                .into());
            }

            self.state = RunState::ActionRunning;
            let produced = self.perform_action(&action).await?;
            pending.extend(self.split_chain(produced));
            self.state = RunState::ActionsEnumerated;

            match action.to {
                CONTEXT_CURRENT => {}
                CONTEXT_EXIT => {
                    self.finish()?;
                    pending.clear();
                }
                CONTEXT_PREV => {
                    let chain = self.enter_context(self.prev_context).await?;
                    pending.extend(chain);
                }
                context_id => {
                    let chain = self.enter_context(context_id).await?;
                    pending.extend(chain);
                }
            }
        }
        Ok(())
    }

    /// Announce a context to the browser: one `Switch`, `ShowAction` per
    /// action in list order, one `SwitchCompleted`. Returns the context's
    /// `instant` actions, which continue the chain without caller input.
    async fn enter_context(&mut self, context_id: u8) -> StepResult<VecDeque<DebotAction>> {
        self.ensure_live()?;
        self.browser
            .notify(BrowserMessage::Switch { context_id })?;
        self.prev_context = self.current_context;
        self.current_context = context_id;
        self.state = RunState::ContextEntered;
        info!(addr = %self.addr, context_id, "context entered");

        let actions = self
            .contexts
            .iter()
            .find(|c| c.id == context_id)
            .map(|c| c.actions.clone())
            .unwrap_or_default();
        for action in &actions {
            self.browser.notify(BrowserMessage::ShowAction {
                action: action.clone(),
            })?;
        }
        self.browser.notify(BrowserMessage::SwitchCompleted)?;
        self.state = RunState::ActionsEnumerated;

        let (instant, selectable): (VecDeque<_>, VecDeque<_>) =
            actions.into_iter().partition(|a| a.is_instant());
        self.action_queue = selectable;
        Ok(instant)
    }

    /// Perform one action's effect and return the follow-up actions it
    /// produced.
    async fn perform_action(&mut self, action: &DebotAction) -> StepResult<Vec<DebotAction>> {
        let kind = action.kind()?;
        let attrs = action.parse_attributes()?;
        debug!(addr = %self.addr, name = %action.name, ?kind, "running action");

        match kind {
            ActionType::Empty | ActionType::Goto => Ok(Vec::new()),
            ActionType::Print => {
                self.browser.notify(BrowserMessage::Log {
                    msg: action.description.clone(),
                })?;
                Ok(Vec::new())
            }
            ActionType::RunAction => {
                let args = self.collect_arguments(action, &attrs).await?;
                let result = self.call_method(&action.name, &args).await?;
                self.process_output(result, true).await
            }
            ActionType::RunMethod => {
                let args = self.collect_arguments(action, &attrs).await?;
                let result = self.call_method(&action.name, &args).await?;
                self.process_output(result, false).await
            }
            ActionType::SendMessage => {
                self.send_message_action(action, &attrs).await?;
                Ok(Vec::new())
            }
            ActionType::Invoke => {
                self.invoke_action(action).await?;
                Ok(Vec::new())
            }
        }
    }

    /// Build, approve, and dispatch an external message. The side effect is
    /// only reachable once the browser's `Approve` reply says so.
    async fn send_message_action(
        &mut self,
        action: &DebotAction,
        attrs: &ActionAttributes,
    ) -> StepResult<()> {
        let args = self.collect_arguments(action, attrs).await?;
        let built = self.call_method(&action.name, &args).await?;
        let message = built
            .get("message")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                DebotError::InvalidJsonParams(format!(
                    "'{}' returned no outbound message",
                    action.name
                ))
            })?
            .to_string();
        let dst = built
            .get("dest")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                DebotError::InvalidJsonParams(format!(
                    "'{}' returned no destination address",
                    action.name
                ))
            })?
            .to_string();
        let setcode = built
            .get("setcode")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let raw = BASE64.decode(&message).map_err(|e| {
            DebotError::InvalidMessage(format!("outbound message is not valid base64: {e}"))
        })?;

        let signer = if attrs.sign {
            Some(self.resolve_signing_box().await?)
        } else {
            None
        };
        let signkey = match signer {
            Some(handle) => {
                let sbox = self
                    .signing
                    .get(handle)
                    .await
                    .ok_or(DebotError::InvalidHandle(handle.0))?;
                let key = sbox
                    .public_key()
                    .await
                    .map_err(|e| DebotError::ExternalCallFailed(e.to_string()))?;
                self.ensure_live()?;
                key
            }
            None => String::new(),
        };

        let emulation = self
            .dispatcher
            .emulate(&message)
            .await
            .map_err(|e| DebotError::ExternalCallFailed(e.to_string()))?;
        self.ensure_live()?;

        let activity = DebotActivity::Transaction {
            msg: message.clone(),
            dst,
            out: emulation.out,
            fee: emulation.fee,
            setcode,
            signkey,
            signing_box_handle: signer.map(|h| h.0).unwrap_or(0),
        };
        let approved = self.browser.approve(activity).await?;
        self.ensure_live()?;
        if !approved {
            info!(addr = %self.addr, name = %action.name, "side effect rejected by browser");
            return Err(DebotError::OperationRejected.into());
        }

        let outbound = match signer {
            Some(handle) => {
                let sbox = self
                    .signing
                    .get(handle)
                    .await
                    .ok_or(DebotError::InvalidHandle(handle.0))?;
                let digest = Sha256::digest(&raw);
                let signature = sbox
                    .sign(digest.as_slice())
                    .await
                    .map_err(|e| DebotError::ExternalCallFailed(e.to_string()))?;
                self.ensure_live()?;
                // detached signature travels ahead of the unsigned body
                let mut signed = signature;
                signed.extend_from_slice(&raw);
                BASE64.encode(signed)
            }
            None => message,
        };
        self.dispatcher
            .send_external_message(&outbound)
            .await
            .map_err(|e| DebotError::ExternalCallFailed(e.to_string()))?;
        self.ensure_live()?;
        Ok(())
    }

    /// Hand control to another DeBot and wait for the browser to ack its
    /// completion. The `misc` payload carries the invocation target.
    async fn invoke_action(&mut self, action: &DebotAction) -> StepResult<()> {
        let raw = BASE64.decode(&action.misc).map_err(|e| {
            DebotError::InvalidJsonParams(format!("invoke payload is not valid base64: {e}"))
        })?;
        let payload: serde_json::Value = serde_json::from_slice(&raw).map_err(|e| {
            DebotError::InvalidJsonParams(format!("invoke payload is not valid JSON: {e}"))
        })?;
        let debot_addr = payload
            .get("debot")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                DebotError::InvalidJsonParams(
                    "invoke payload names no target debot".to_string(),
                )
            })?
            .to_string();
        let target: DebotAction = serde_json::from_value(
            payload
                .get("action")
                .cloned()
                .unwrap_or(serde_json::Value::Null),
        )
        .map_err(|e| {
            DebotError::InvalidJsonParams(format!("invoke payload has no valid action: {e}"))
        })?;

        self.browser.invoke_debot(debot_addr, target).await?;
        self.ensure_live()?;
        Ok(())
    }

    /// Collect call arguments per the action's `args`/`fargs` flags.
    async fn collect_arguments(
        &mut self,
        action: &DebotAction,
        attrs: &ActionAttributes,
    ) -> StepResult<serde_json::Value> {
        let mut collected = serde_json::Map::new();

        if attrs.args.is_some() {
            let value = self.ask_input(&action.description).await?;
            let parsed: serde_json::Value = serde_json::from_str(&value).map_err(|e| {
                DebotError::InvalidJsonParams(format!("arguments are not valid JSON: {e}"))
            })?;
            match parsed {
                serde_json::Value::Object(map) => collected.extend(map),
                _ => {
                    return Err(DebotError::InvalidJsonParams(
                        "arguments must be a JSON object".to_string(),
                    )
                    .into());
                }
            }
        }

        if let Some(fargs_method) = &attrs.fargs {
            let template = self
                .call_method(fargs_method, &serde_json::json!({}))
                .await?;
            let prompts = template
                .get("params")
                .and_then(|v| v.as_array())
                .ok_or_else(|| {
                    DebotError::InvalidJsonParams(format!(
                        "'{fargs_method}' returned no params list"
                    ))
                })?
                .clone();
            for prompt in prompts {
                let name = prompt.as_str().ok_or_else(|| {
                    DebotError::InvalidJsonParams(format!(
                        "'{fargs_method}' returned a non-string param name"
                    ))
                })?;
                let value = self.ask_input(name).await?;
                collected.insert(name.to_string(), serde_json::Value::String(value));
            }
        }

        Ok(serde_json::Value::Object(collected))
    }

    /// Emit any `log` lines the bot produced and, when allowed, parse the
    /// follow-up actions it returned.
    async fn process_output(
        &mut self,
        result: serde_json::Value,
        allow_actions: bool,
    ) -> StepResult<Vec<DebotAction>> {
        if let Some(lines) = result.get("log").and_then(|v| v.as_array()) {
            for line in lines {
                let msg = line
                    .as_str()
                    .ok_or_else(|| {
                        DebotError::InvalidJsonParams(
                            "log output must be a list of strings".to_string(),
                        )
                    })?
                    .to_string();
                self.browser.notify(BrowserMessage::Log { msg })?;
            }
        }
        if !allow_actions {
            return Ok(Vec::new());
        }
        match result.get("actions") {
            None => Ok(Vec::new()),
            Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| {
                DebotError::InvalidJsonParams(format!("bot returned malformed actions: {e}"))
                    .into()
            }),
        }
    }

    /// Reuse the instance's delegated signing box or ask the browser for
    /// one, recording the ownership transfer.
    async fn resolve_signing_box(&mut self) -> StepResult<SigningBoxHandle> {
        if let Some(handle) = self.signing_box {
            return Ok(handle);
        }
        let handle = self.browser.get_signing_box().await?;
        self.ensure_live()?;
        if self.signing.get(handle).await.is_none() {
            return Err(DebotError::InvalidHandle(handle.0).into());
        }
        self.signing_box = Some(handle);
        self.shared.claim_box(handle);
        info!(addr = %self.addr, handle = handle.0, "signing box delegated to instance");
        Ok(handle)
    }

    async fn call_method(
        &self,
        method: &str,
        args: &serde_json::Value,
    ) -> StepResult<serde_json::Value> {
        let result = self
            .runner
            .call(&self.abi, method, args)
            .await
            .map_err(|e| DebotError::GetMethodFailed(format!("'{method}': {e}")))?;
        self.ensure_live()?;
        Ok(result)
    }

    async fn ask_input(&self, prompt: &str) -> StepResult<String> {
        let value = self.browser.input(prompt).await?;
        self.ensure_live()?;
        Ok(value)
    }

    /// Announce the finish sentinel and return to `Idle`.
    fn finish(&mut self) -> StepResult<()> {
        self.browser.notify(BrowserMessage::Switch {
            context_id: CONTEXT_EXIT,
        })?;
        self.state = RunState::Idle;
        self.action_queue.clear();
        info!(addr = %self.addr, "debot finished");
        Ok(())
    }

    fn ensure_live(&self) -> StepResult<()> {
        if self.shared.is_removed() {
            Err(Interrupt::Removed)
        } else {
            Ok(())
        }
    }

    /// Split bot-produced follow-ups: the leading `instant` ones continue
    /// the chain, the rest join the selectable queue.
    fn split_chain(&mut self, produced: Vec<DebotAction>) -> VecDeque<DebotAction> {
        let mut rest: VecDeque<DebotAction> = produced.into();
        let mut chain = VecDeque::new();
        while rest.front().is_some_and(|a| a.is_instant()) {
            if let Some(action) = rest.pop_front() {
                chain.push_back(action);
            }
        }
        self.action_queue.extend(rest);
        chain
    }
}
