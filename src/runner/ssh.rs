use std::io::Read;
use std::net::TcpStream;
use std::time::Duration;

use log::{debug, info};
use ssh2::Session;

use crate::runner::{CommandOutput, CommandRunner, RunnerError};

/// Runs commands on a remote emulation host over one SSH session.
pub struct SshRunner {
    username: String,
    host: String,
    password: Option<String>,
    port: u16,
    timeout: Option<Duration>,
    session: Option<Session>,
}

impl SshRunner {
    pub fn new_with_password(username: String, host: String, password: String, port: u16) -> Self {
        Self {
            username,
            host,
            password: Some(password),
            port,
            timeout: None,
            session: None,
        }
    }

    /// Authenticates through the running ssh-agent instead of a password.
    pub fn new_with_agent(username: String, host: String, port: u16) -> Self {
        Self {
            username,
            host,
            password: None,
            port,
            timeout: None,
            session: None,
        }
    }

    /// Blocking-call timeout applied to the session once connected.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn connect(&mut self) -> Result<(), RunnerError> {
        if self.session.is_some() {
            return Err(RunnerError::Ssh("Already connected".to_string()));
        }
        let tcp = TcpStream::connect(format!("{}:{}", self.host, self.port))
            .map_err(|e| RunnerError::Tcp(e.to_string()))?;
        let mut session = Session::new().map_err(|e| RunnerError::Ssh(e.to_string()))?;
        session.set_tcp_stream(tcp);
        if let Some(timeout) = self.timeout {
            session.set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);
        }
        session.handshake().map_err(|e| RunnerError::Ssh(e.to_string()))?;
        match &self.password {
            Some(password) => session
                .userauth_password(&self.username, password)
                .map_err(|e| RunnerError::Auth(e.to_string()))?,
            None => session
                .userauth_agent(&self.username)
                .map_err(|e| RunnerError::Auth(e.to_string()))?,
        }
        if !session.authenticated() {
            return Err(RunnerError::Auth("Authentication failed".to_string()));
        }
        info!("connected to {}@{}:{}", self.username, self.host, self.port);
        self.session = Some(session);
        Ok(())
    }

    /// Stderr is merged into stdout on the channel, so a chatty command cannot
    /// fill one stream's window while the other is being read.
    fn execute_command(session: &Session, command: &str) -> Result<CommandOutput, RunnerError> {
        let mut channel = session.channel_session().map_err(|e| RunnerError::Ssh(e.to_string()))?;
        channel
            .handle_extended_data(ssh2::ExtendedData::Merge)
            .map_err(|e| RunnerError::Ssh(e.to_string()))?;
        channel.exec(command).map_err(|e| RunnerError::Command(e.to_string()))?;
        let mut stdout = String::new();
        channel.read_to_string(&mut stdout).map_err(|e| RunnerError::Command(e.to_string()))?;
        channel.wait_close().map_err(|e| RunnerError::Ssh(e.to_string()))?;
        let status = channel.exit_status().map_err(|e| RunnerError::Ssh(e.to_string()))?;
        Ok(CommandOutput {
            status,
            stdout,
            stderr: String::new(),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn close(self) -> Result<(), RunnerError> {
        if let Some(session) = self.session {
            session
                .disconnect(Some(ssh2::DisconnectCode::ByApplication), "", None)
                .map_err(|e| RunnerError::Ssh(e.to_string()))?;
        }
        Ok(())
    }
}

impl CommandRunner for SshRunner {
    fn run(&self, command: &str) -> Result<CommandOutput, RunnerError> {
        let session = match &self.session {
            Some(s) => s,
            None => return Err(RunnerError::Ssh("Session not initialized".to_string())),
        };
        debug!("{}: {}", self.host, command);
        Self::execute_command(session, command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_emulation_host_runner() -> SshRunner {
        SshRunner::new_with_password(
            "client".to_string(),
            "localhost".to_string(),
            "password".to_string(),
            2221,
        )
    }

    #[test]
    fn test_run_before_connect_fails() {
        let runner = new_emulation_host_runner();
        assert!(!runner.is_connected());
        let res = runner.run("true");
        assert!(matches!(res, Err(RunnerError::Ssh(_))));
    }

    #[test]
    #[ignore = "needs an SSH server on localhost:2221"]
    fn test_execute_command() {
        let mut runner = new_emulation_host_runner();
        let res = runner.connect();
        if let Err(e) = &res {
            println!("Error connecting: {}", e);
        }
        assert!(res.is_ok());

        let output = runner.run("echo \"Hello!\"");
        dbg!(&output);
        let output = output.unwrap();
        assert_eq!(output.stdout, "Hello!\n");
        assert_eq!(output.status, 0);
        runner.close().unwrap();
    }

    #[test]
    #[ignore = "needs an SSH server on localhost:2221"]
    fn test_streams_are_merged() {
        let mut runner = new_emulation_host_runner();
        runner.connect().unwrap();

        let output = runner
            .run("i=0; while [ $i -lt 20000 ]; do echo err >&2; i=$((i+1)); done; echo out; exit 3")
            .unwrap();
        assert_eq!(output.status, 3);
        assert!(output.stderr.is_empty());
        assert!(output.stdout.ends_with("err\nout\n"));
        assert_eq!(output.error_text(), output.stdout.trim_end());
        runner.close().unwrap();
    }
}
