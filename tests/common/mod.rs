//! Shared helpers for integration tests: a tiny class-file writer, a scripted
//! control agent and a fake debugger handle.

#![allow(dead_code)]

use crossbeam_channel::{Receiver, Sender};
use snipbox::core::channel::{read_frame, write_frame};
use snipbox::core::launcher::{AgentLauncher, ControllerBox};
use snipbox::core::types::{ControlRequest, ControlResponse, OutputStream};
use snipbox::interrupt::{AgentLayout, FrameId, FrameInfo, ObjectId, RuntimeHandle, ThreadId};
use snipbox::store::CompiledUnit;
use snipbox::{Result, SandboxError};
use std::collections::HashMap;
use std::net::{Ipv4Addr, TcpStream};
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const GETSTATIC: u8 = 0xb2;
const INVOKEVIRTUAL: u8 = 0xb6;
const INVOKESTATIC: u8 = 0xb8;
const POP: u8 = 0x57;
const RETURN: u8 = 0xb1;

/// Writes a class with a single static `run()V` method whose body is the
/// recorded instructions followed by `return`.
pub struct ClassBuilder {
    name: String,
    pool: Vec<u8>,
    pool_count: u16,
    utf8s: HashMap<String, u16>,
    fields: Vec<(u16, u16)>,
    code: Vec<u8>,
}

impl ClassBuilder {
    /// `name` is the internal (slash-separated) class name
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            pool: Vec::new(),
            pool_count: 0,
            utf8s: HashMap::new(),
            fields: Vec::new(),
            code: Vec::new(),
        }
    }

    fn push_constant(&mut self, bytes: &[u8]) -> u16 {
        self.pool.extend_from_slice(bytes);
        self.pool_count += 1;
        self.pool_count
    }

    fn utf8(&mut self, value: &str) -> u16 {
        if let Some(index) = self.utf8s.get(value) {
            return *index;
        }
        let mut bytes = vec![1];
        bytes.extend_from_slice(&(value.len() as u16).to_be_bytes());
        bytes.extend_from_slice(value.as_bytes());
        let index = self.push_constant(&bytes);
        self.utf8s.insert(value.to_string(), index);
        index
    }

    fn class(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        let mut bytes = vec![7];
        bytes.extend_from_slice(&name_index.to_be_bytes());
        self.push_constant(&bytes)
    }

    fn member(&mut self, tag: u8, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(owner);
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        let mut name_and_type = vec![12];
        name_and_type.extend_from_slice(&name_index.to_be_bytes());
        name_and_type.extend_from_slice(&descriptor_index.to_be_bytes());
        let name_and_type_index = self.push_constant(&name_and_type);
        let mut bytes = vec![tag];
        bytes.extend_from_slice(&class_index.to_be_bytes());
        bytes.extend_from_slice(&name_and_type_index.to_be_bytes());
        self.push_constant(&bytes)
    }

    fn emit(&mut self, opcode: u8, index: u16) {
        self.code.push(opcode);
        self.code.extend_from_slice(&index.to_be_bytes());
    }

    /// Declare a static field on the class itself
    pub fn field(mut self, name: &str, descriptor: &str) -> Self {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.fields.push((name_index, descriptor_index));
        self
    }

    pub fn get_static(mut self, owner: &str, name: &str, descriptor: &str) -> Self {
        let index = self.member(9, owner, name, descriptor);
        self.emit(GETSTATIC, index);
        self.code.push(POP);
        self
    }

    pub fn invoke_static(mut self, owner: &str, name: &str, descriptor: &str) -> Self {
        let index = self.member(10, owner, name, descriptor);
        self.emit(INVOKESTATIC, index);
        self
    }

    pub fn invoke_virtual(mut self, owner: &str, name: &str, descriptor: &str) -> Self {
        let index = self.member(10, owner, name, descriptor);
        self.emit(INVOKEVIRTUAL, index);
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        let name = self.name.clone();
        let this_class = self.class(&name);
        let run = self.utf8("run");
        let void = self.utf8("()V");
        let code_attr = self.utf8("Code");

        let mut buf = Vec::new();
        buf.extend_from_slice(&0xcafe_babe_u32.to_be_bytes());
        buf.extend_from_slice(&[0, 0, 0, 61]);
        buf.extend_from_slice(&(self.pool_count + 1).to_be_bytes());
        buf.extend_from_slice(&self.pool);
        // public super, this, no super class, no interfaces
        buf.extend_from_slice(&0x0021u16.to_be_bytes());
        buf.extend_from_slice(&this_class.to_be_bytes());
        buf.extend_from_slice(&[0, 0, 0, 0]);

        buf.extend_from_slice(&(self.fields.len() as u16).to_be_bytes());
        for (name_index, descriptor_index) in &self.fields {
            buf.extend_from_slice(&0x0009u16.to_be_bytes());
            buf.extend_from_slice(&name_index.to_be_bytes());
            buf.extend_from_slice(&descriptor_index.to_be_bytes());
            buf.extend_from_slice(&[0, 0]);
        }

        let mut code = self.code;
        code.push(RETURN);
        buf.extend_from_slice(&[0, 1]);
        buf.extend_from_slice(&0x0009u16.to_be_bytes());
        buf.extend_from_slice(&run.to_be_bytes());
        buf.extend_from_slice(&void.to_be_bytes());
        buf.extend_from_slice(&[0, 1]);
        buf.extend_from_slice(&code_attr.to_be_bytes());
        buf.extend_from_slice(&((12 + code.len()) as u32).to_be_bytes());
        // max stack, max locals
        buf.extend_from_slice(&[0, 4, 0, 0]);
        buf.extend_from_slice(&(code.len() as u32).to_be_bytes());
        buf.extend_from_slice(&code);
        // no exception table, no code attributes
        buf.extend_from_slice(&[0, 0, 0, 0]);
        // no class attributes
        buf.extend_from_slice(&[0, 0]);
        buf
    }

    /// Build as a compiled unit named after the class
    pub fn unit(self) -> CompiledUnit {
        let name = self.name.replace('/', ".");
        CompiledUnit::new(name, self.build())
    }
}

/// What the scripted agent does when asked to run user code
#[derive(Clone, Debug)]
pub enum InvokeBehavior {
    /// Print to stdout then return the value
    Return { stdout: String, value: String },
    Throw { exception_class: String, message: String },
    /// Block until the fake runtime injects a stop, then report `stopped`
    Hang,
}

#[derive(Clone, Debug)]
pub struct AgentScript {
    pub invoke: InvokeBehavior,
    /// Answer installs with `install_failed` instead of `loaded`
    pub fail_install: bool,
}

impl AgentScript {
    pub fn returning(stdout: &str, value: &str) -> Self {
        Self {
            invoke: InvokeBehavior::Return {
                stdout: stdout.to_string(),
                value: value.to_string(),
            },
            fail_install: false,
        }
    }

    pub fn hanging() -> Self {
        Self {
            invoke: InvokeBehavior::Hang,
            fail_install: false,
        }
    }

    pub fn throwing(exception_class: &str, message: &str) -> Self {
        Self {
            invoke: InvokeBehavior::Throw {
                exception_class: exception_class.to_string(),
                message: message.to_string(),
            },
            fail_install: false,
        }
    }
}

/// Debugger handle whose only thread sits in the agent's `invoke` frame
/// with user code running. Injecting the stop exception wakes the scripted
/// agent.
pub struct FakeRuntime {
    layout: AgentLayout,
    booleans: HashMap<String, bool>,
    stops: Sender<()>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeRuntime {
    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

impl RuntimeHandle for FakeRuntime {
    fn suspend(&mut self) -> Result<()> {
        self.record("suspend");
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.record("resume");
        Ok(())
    }

    fn threads(&mut self) -> Result<Vec<ThreadId>> {
        Ok(vec![ThreadId(1)])
    }

    fn frames(&mut self, _thread: ThreadId) -> Result<Vec<FrameInfo>> {
        Ok(vec![
            FrameInfo {
                frame_id: FrameId(10),
                declaring_type: "REPL.$JShell$11".to_string(),
                method: "do_it$".to_string(),
            },
            FrameInfo {
                frame_id: FrameId(11),
                declaring_type: self.layout.agent_type.clone(),
                method: "invoke".to_string(),
            },
        ])
    }

    fn this_object(&mut self, _thread: ThreadId, _frame: FrameId) -> Result<Option<ObjectId>> {
        Ok(Some(ObjectId(1)))
    }

    fn boolean_field(&mut self, _object: ObjectId, field: &str) -> Result<bool> {
        Ok(self.booleans.get(field).copied().unwrap_or(true))
    }

    fn set_boolean_field(&mut self, _object: ObjectId, field: &str, value: bool) -> Result<()> {
        self.booleans.insert(field.to_string(), value);
        Ok(())
    }

    fn object_field(&mut self, _object: ObjectId, _field: &str) -> Result<Option<ObjectId>> {
        Ok(Some(ObjectId(2)))
    }

    fn stop_thread(&mut self, _thread: ThreadId, _exception: ObjectId) -> Result<()> {
        self.record("stop_thread");
        let _ = self.stops.send(());
        Ok(())
    }

    fn dispose(&mut self) -> Result<()> {
        self.record("dispose");
        Ok(())
    }
}

/// Launches a real (idle) child process as the runtime stand-in and a
/// scripted agent thread that connects to the control port.
pub struct ScriptedLauncher {
    pub script: AgentScript,
    /// Shell command run as the child; it leads its own process group
    pub child_command: String,
    /// Requests the agent received, by wire name
    pub requests: Arc<Mutex<Vec<String>>>,
    /// Calls made on the fake runtime
    pub runtime_calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedLauncher {
    pub fn new(script: AgentScript) -> Self {
        Self {
            script,
            child_command: "sleep 30".to_string(),
            requests: Arc::new(Mutex::new(Vec::new())),
            runtime_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_child(mut self, command: &str) -> Self {
        self.child_command = command.to_string();
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn runtime_calls(&self) -> Vec<String> {
        self.runtime_calls.lock().unwrap().clone()
    }
}

impl AgentLauncher for ScriptedLauncher {
    fn launch(&self, control_port: u16) -> Result<ControllerBox> {
        let process = Command::new("sh")
            .arg("-c")
            .arg(&self.child_command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .process_group(0)
            .spawn()
            .map_err(|e| SandboxError::ChildSetup(format!("spawn: {}", e)))?;

        let (stops, stop_signals) = crossbeam_channel::unbounded();
        let script = self.script.clone();
        let requests = Arc::clone(&self.requests);
        std::thread::spawn(move || {
            if let Ok(stream) = TcpStream::connect((Ipv4Addr::LOCALHOST, control_port)) {
                run_agent(stream, script, requests, stop_signals);
            }
        });

        Ok(ControllerBox {
            process,
            runtime: Box::new(FakeRuntime {
                layout: AgentLayout::default(),
                booleans: HashMap::new(),
                stops,
                calls: Arc::clone(&self.runtime_calls),
            }),
        })
    }
}

fn run_agent(
    mut stream: TcpStream,
    script: AgentScript,
    requests: Arc<Mutex<Vec<String>>>,
    stop_signals: Receiver<()>,
) {
    loop {
        let request: ControlRequest = match read_frame(&mut stream) {
            Ok(request) => request,
            Err(_) => return,
        };
        requests.lock().unwrap().push(request.name().to_string());
        let responses = match request {
            ControlRequest::Load { units } | ControlRequest::Redefine { units } => {
                if script.fail_install {
                    vec![ControlResponse::InstallFailed {
                        unit: units[0].name.clone(),
                        message: "verify error".to_string(),
                    }]
                } else {
                    vec![ControlResponse::Loaded {
                        units: units.into_iter().map(|unit| unit.name).collect(),
                    }]
                }
            }
            ControlRequest::Invoke { .. } | ControlRequest::VarValue { .. } => {
                match &script.invoke {
                    InvokeBehavior::Return { stdout, value } => vec![
                        ControlResponse::Output {
                            stream: OutputStream::Stdout,
                            text: stdout.clone(),
                        },
                        ControlResponse::Value {
                            value: value.clone(),
                        },
                    ],
                    InvokeBehavior::Throw {
                        exception_class,
                        message,
                    } => vec![ControlResponse::UserException {
                        exception_class: exception_class.clone(),
                        message: Some(message.clone()),
                    }],
                    InvokeBehavior::Hang => match stop_signals.recv_timeout(Duration::from_secs(10)) {
                        Ok(()) => vec![ControlResponse::Stopped],
                        Err(_) => return,
                    },
                }
            }
            ControlRequest::AddToClasspath { .. } | ControlRequest::Close => {
                vec![ControlResponse::Done]
            }
        };
        for response in &responses {
            if write_frame(&mut stream, response).is_err() {
                return;
            }
        }
    }
}
