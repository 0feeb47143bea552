//! Forceful interruption of user code running in a child runtime
//!
//! The mechanism is: suspend the runtime, find the agent frame that is
//! executing user code, flip its state flags, inject the agent's
//! pre-allocated stop exception into that thread, resume. Every name it
//! relies on lives in [`AgentLayout`] and is tied to the agent version
//! running in the child. It is best-effort.

pub mod jdwp;

use crate::config::types::{Result, SandboxError};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread#{}", self.0)
    }
}

/// One stack frame, innermost first
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameInfo {
    pub frame_id: FrameId,
    /// Dotted name of the method's declaring type
    pub declaring_type: String,
    pub method: String,
}

/// Debugger-level access to a child runtime
pub trait RuntimeHandle: Send {
    /// Suspend every thread
    fn suspend(&mut self) -> Result<()>;

    fn resume(&mut self) -> Result<()>;

    fn threads(&mut self) -> Result<Vec<ThreadId>>;

    fn frames(&mut self, thread: ThreadId) -> Result<Vec<FrameInfo>>;

    /// `this` of a frame; `None` for static and native frames
    fn this_object(&mut self, thread: ThreadId, frame: FrameId) -> Result<Option<ObjectId>>;

    fn boolean_field(&mut self, object: ObjectId, field: &str) -> Result<bool>;

    fn set_boolean_field(&mut self, object: ObjectId, field: &str, value: bool) -> Result<()>;

    fn object_field(&mut self, object: ObjectId, field: &str) -> Result<Option<ObjectId>>;

    /// Asynchronously throw `exception` in `thread`
    fn stop_thread(&mut self, thread: ThreadId, exception: ObjectId) -> Result<()>;

    /// Detach from the runtime. The runtime keeps running.
    fn dispose(&mut self) -> Result<()>;
}

/// Names inside the agent the interrupt depends on
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentLayout {
    pub agent_type: String,
    pub entry_points: Vec<String>,
    pub in_client_code_field: String,
    pub expecting_stop_field: String,
    pub stop_exception_field: String,
}

impl Default for AgentLayout {
    fn default() -> Self {
        Self {
            agent_type: "jdk.jshell.execution.RemoteExecutionControl".to_string(),
            entry_points: vec!["invoke".to_string(), "varValue".to_string()],
            in_client_code_field: "inClientCode".to_string(),
            expecting_stop_field: "expectingStop".to_string(),
            stop_exception_field: "stopException".to_string(),
        }
    }
}

impl AgentLayout {
    pub fn is_agent_frame(&self, frame: &FrameInfo) -> bool {
        frame.declaring_type == self.agent_type
            && self.entry_points.iter().any(|entry| *entry == frame.method)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InterruptOutcome {
    /// Stop exception injected into the agent thread
    Stopped { thread: ThreadId },
    /// Agent frame found but it was not running user code
    NotInUserCode { thread: ThreadId },
    /// No thread was inside an agent entry point
    NoAgentFrame,
}

pub struct ForcefulInterrupt<'a> {
    runtime: &'a mut dyn RuntimeHandle,
    layout: &'a AgentLayout,
}

impl<'a> ForcefulInterrupt<'a> {
    pub fn new(runtime: &'a mut dyn RuntimeHandle, layout: &'a AgentLayout) -> Self {
        Self { runtime, layout }
    }

    /// Run the interrupt with the runtime suspended. The runtime is resumed
    /// whether or not the interrupt itself succeeds.
    pub fn run(&mut self) -> Result<InterruptOutcome> {
        self.runtime
            .suspend()
            .map_err(|e| SandboxError::Interrupt(format!("failed to suspend runtime: {e}")))?;

        let outcome = self.interrupt_agent_thread();
        let resumed = self.runtime.resume();

        let outcome = outcome
            .map_err(|e| SandboxError::Interrupt(format!("failed to stop remote execution: {e}")))?;
        resumed.map_err(|e| SandboxError::Interrupt(format!("failed to resume runtime: {e}")))?;
        Ok(outcome)
    }

    fn interrupt_agent_thread(&mut self) -> Result<InterruptOutcome> {
        for thread in self.runtime.threads()? {
            let frames = self.runtime.frames(thread)?;
            let Some(frame) = frames.iter().find(|frame| self.layout.is_agent_frame(frame)) else {
                continue;
            };
            log::debug!(
                "Agent frame {}.{} found on {}",
                frame.declaring_type,
                frame.method,
                thread
            );
            let agent = self.runtime.this_object(thread, frame.frame_id)?.ok_or_else(|| {
                SandboxError::Interrupt(format!("agent frame on {thread} has no instance"))
            })?;
            return self.stop_agent_thread(thread, agent);
        }
        Ok(InterruptOutcome::NoAgentFrame)
    }

    fn stop_agent_thread(&mut self, thread: ThreadId, agent: ObjectId) -> Result<InterruptOutcome> {
        if !self
            .runtime
            .boolean_field(agent, &self.layout.in_client_code_field)?
        {
            return Ok(InterruptOutcome::NotInUserCode { thread });
        }
        self.runtime
            .set_boolean_field(agent, &self.layout.expecting_stop_field, true)?;
        let stop = self
            .runtime
            .object_field(agent, &self.layout.stop_exception_field)?
            .ok_or_else(|| {
                SandboxError::Interrupt(format!(
                    "{} is null on the agent",
                    self.layout.stop_exception_field
                ))
            })?;
        log::info!("Injecting stop into user code on {}", thread);
        self.runtime.stop_thread(thread, stop)?;
        Ok(InterruptOutcome::Stopped { thread })
    }
}
