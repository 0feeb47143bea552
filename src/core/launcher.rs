/// Child runtime launch
///
/// The child is started with the debug agent connecting back to a loopback
/// listener we own and with every thread suspended, so the debug connection
/// exists before any user code can run. Once attached the runtime is resumed
/// and the agent main connects to the control port it was given.
use crate::config::types::{Result, SandboxError};
use crate::core::types::LaunchProfile;
use crate::interrupt::jdwp::connection::JdwpConnection;
use crate::interrupt::jdwp::JdwpRuntime;
use crate::interrupt::RuntimeHandle;
use crate::kernel::signal::terminate_process_group;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);
const SETUP_KILL_GRACE: Duration = Duration::from_millis(100);

fn to_setup_error(prefix: &str, err: impl std::fmt::Display) -> SandboxError {
    SandboxError::ChildSetup(format!("{prefix}: {err}"))
}

/// A started child: its process (leader of its own process group) and the
/// debugger-level handle to it.
pub struct ControllerBox {
    pub process: Child,
    pub runtime: Box<dyn RuntimeHandle>,
}

impl ControllerBox {
    /// Detach and kill the child; used when setup fails half-way
    pub fn abandon(mut self) {
        if let Err(e) = self.runtime.dispose() {
            log::debug!("Dispose during abandoned setup failed: {}", e);
        }
        let report = terminate_process_group(&mut self.process, SETUP_KILL_GRACE);
        log::debug!("Abandoned child reaped: {:?}", report);
    }
}

pub trait AgentLauncher: Send + Sync {
    /// Start a child whose agent will connect to `control_port` on loopback
    fn launch(&self, control_port: u16) -> Result<ControllerBox>;
}

pub struct JvmLauncher {
    profile: LaunchProfile,
}

impl JvmLauncher {
    pub fn new(profile: LaunchProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &LaunchProfile {
        &self.profile
    }

    /// The full command line for a given pair of ports
    pub fn command(&self, debug_port: u16, control_port: u16) -> Result<Command> {
        let mut cmd = Command::new(&self.profile.java);
        cmd.args(&self.profile.vm_options);
        cmd.arg(format!(
            "-agentlib:jdwp=transport=dt_socket,server=n,suspend=y,address=127.0.0.1:{}",
            debug_port
        ));
        if !self.profile.classpath.is_empty() {
            let classpath = std::env::join_paths(&self.profile.classpath)
                .map_err(|e| SandboxError::Config(format!("invalid classpath: {}", e)))?;
            cmd.arg("-cp").arg(classpath);
        }
        cmd.arg(&self.profile.agent_main)
            .arg(control_port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .process_group(0);
        Ok(cmd)
    }
}

impl AgentLauncher for JvmLauncher {
    fn launch(&self, control_port: u16) -> Result<ControllerBox> {
        let timeout = self.profile.connect_timeout();
        let debug_listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .map_err(|e| to_setup_error("bind debug listener", e))?;
        let debug_port = debug_listener.local_addr()?.port();

        let mut child = self
            .command(debug_port, control_port)?
            .spawn()
            .map_err(|e| to_setup_error(&format!("spawn {}", self.profile.java.display()), e))?;
        log::info!(
            "Started child runtime pid={} (debug port {}, control port {})",
            child.id(),
            debug_port,
            control_port
        );

        let attached = accept_within(&debug_listener, timeout, &mut child)
            .and_then(|stream| JdwpConnection::establish(stream, timeout));
        let connection = match attached {
            Ok(connection) => connection,
            Err(e) => {
                terminate_process_group(&mut child, SETUP_KILL_GRACE);
                return Err(to_setup_error("attach debugger", e));
            }
        };

        let mut runtime = JdwpRuntime::new(connection);
        if let Err(e) = runtime.resume() {
            let _ = runtime.dispose();
            terminate_process_group(&mut child, SETUP_KILL_GRACE);
            return Err(to_setup_error("resume child runtime", e));
        }

        Ok(ControllerBox {
            process: child,
            runtime: Box::new(runtime),
        })
    }
}

/// Accept one connection, giving up when `timeout` passes or `child` exits
/// first.
pub fn accept_within(
    listener: &TcpListener,
    timeout: Duration,
    child: &mut Child,
) -> Result<TcpStream> {
    listener.set_nonblocking(true)?;
    let started = Instant::now();
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false)?;
                log::debug!("Accepted connection from {}", peer);
                return Ok(stream);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                if let Some(status) = child.try_wait()? {
                    return Err(SandboxError::ChildSetup(format!(
                        "child exited with {} before connecting",
                        status
                    )));
                }
                if started.elapsed() >= timeout {
                    return Err(SandboxError::ChildSetup(format!(
                        "child did not connect within {} ms",
                        timeout.as_millis()
                    )));
                }
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> LaunchProfile {
        LaunchProfile {
            java: "java".into(),
            vm_options: vec!["-Xmx64m".to_string()],
            classpath: vec!["/opt/agent.jar".into(), "/opt/lib".into()],
            agent_main: "snipbox.Agent".to_string(),
            connect_timeout_ms: 3000,
        }
    }

    #[test]
    fn test_command_line() {
        let cmd = JvmLauncher::new(profile()).command(5005, 6006).unwrap();
        let args: Vec<String> = cmd
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert_eq!(cmd.get_program(), "java");
        assert_eq!(
            args,
            vec![
                "-Xmx64m",
                "-agentlib:jdwp=transport=dt_socket,server=n,suspend=y,address=127.0.0.1:5005",
                "-cp",
                "/opt/agent.jar:/opt/lib",
                "snipbox.Agent",
                "6006",
            ]
        );
    }

    #[test]
    fn test_accept_gives_up_on_exited_child() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut child = Command::new("true").spawn().unwrap();
        let err = accept_within(&listener, Duration::from_secs(5), &mut child).unwrap_err();
        assert!(matches!(err, SandboxError::ChildSetup(msg) if msg.contains("before connecting")));
    }

    #[test]
    fn test_accept_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        let started = Instant::now();
        let err = accept_within(&listener, Duration::from_millis(100), &mut child).unwrap_err();
        assert!(matches!(err, SandboxError::ChildSetup(msg) if msg.contains("within 100 ms")));
        assert!(started.elapsed() < Duration::from_secs(2));
        let _ = child.kill();
        let _ = child.wait();
    }

    #[test]
    fn test_accept_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        let client = std::thread::spawn(move || TcpStream::connect(("127.0.0.1", port)).unwrap());
        let stream = accept_within(&listener, Duration::from_secs(5), &mut child).unwrap();
        let _client = client.join().unwrap();
        assert!(stream.peer_addr().is_ok());
        let _ = child.kill();
        let _ = child.wait();
    }

    #[test]
    fn test_missing_java_is_a_setup_error() {
        let mut profile = profile();
        profile.java = "/nonexistent/bin/java".into();
        profile.classpath.clear();
        let err = JvmLauncher::new(profile).launch(1).err().unwrap();
        assert!(matches!(err, SandboxError::ChildSetup(msg) if msg.contains("spawn")));
    }
}
