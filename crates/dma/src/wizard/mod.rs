//! Interactive parameter resolution.
//!
//! Values given on the command line or in the config file are never asked
//! for again. Whatever is still missing is prompted for when a terminal is
//! attached; without one a missing value is a configuration error.

mod prompts;
mod ui;

pub use prompts::DialoguerPrompter;
pub use ui::{state_message, TerminalUi};

use crate::config::{ConnectionArgs, ConnectionParams, EngineKind};
use crate::error::{Error, Result};
use crate::prober::{ProbeOperation, ProbeRequest};

/// Source of interactive answers.
pub trait Prompter {
    /// Whether a user can answer prompts.
    fn is_interactive(&self) -> bool;

    /// Asks for one of `engines`.
    fn select_engine(&self, engines: &[EngineKind]) -> Result<EngineKind>;

    /// Asks for a line of text, offering `default`.
    fn input(&self, prompt: &str, default: Option<&str>) -> Result<String>;

    /// Asks for a secret without echoing it.
    fn password(&self, prompt: &str) -> Result<String>;

    /// Asks a yes/no question.
    fn confirm(&self, prompt: &str) -> Result<bool>;
}

/// Connectivity check parameters as given on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeArgs {
    /// Test resource id.
    pub test_id: Option<String>,
    /// Cloud project.
    pub project: Option<String>,
    /// Migration target IP.
    pub target_ip: Option<String>,
    /// Source database IP.
    pub source_ip: Option<String>,
    /// Source database port.
    pub source_port: Option<u16>,
    /// Operation to perform.
    pub operation: ProbeOperation,
}

/// Fills missing parameters through a [`Prompter`].
pub struct ParameterResolver<'p> {
    prompter: &'p dyn Prompter,
}

impl<'p> ParameterResolver<'p> {
    /// Creates a resolver asking `prompter`.
    pub fn new(prompter: &'p dyn Prompter) -> Self {
        Self { prompter }
    }

    /// Completes `args` into connection parameters.
    ///
    /// The port prompt defaults to the engine's standard port, which is also
    /// used as-is without a terminal. The password prompt is hidden.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a value is missing and there is no
    /// terminal, or if an answer is invalid.
    pub fn resolve_connection(&self, args: ConnectionArgs) -> Result<ConnectionParams> {
        let engine = match args.db_type {
            Some(engine) => engine,
            None => {
                self.require_terminal("db-type")?;
                self.prompter.select_engine(&EngineKind::all())?
            }
        };
        let hostname = self.text(args.hostname, "hostname", "Database hostname", None)?;
        let port = match args.port {
            Some(port) => port,
            None if !self.prompter.is_interactive() => engine.default_port(),
            None => {
                let default = engine.default_port().to_string();
                let answer = self.text(None, "port", "Database port", Some(&default))?;
                parse_port(&answer)?
            }
        };
        let database = self.text(args.database, "database", "Database name", None)?;
        let username = self.text(args.username, "username", "Database username", None)?;
        let password = self.resolve_secret(args.password, "password", "Database password")?;

        let params = ConnectionParams {
            engine,
            host: hostname,
            port,
            database,
            username,
            password,
            collection_identifier: args.collection_identifier,
        };
        params.validate()?;
        Ok(params)
    }

    /// Completes `args` into a probe request. Endpoints are only asked for
    /// when creating a test.
    ///
    /// # Errors
    ///
    /// Same conditions as [`ParameterResolver::resolve_connection`].
    pub fn resolve_probe(&self, args: ProbeArgs) -> Result<ProbeRequest> {
        let test_id = self.text(args.test_id, "test-id", "Connectivity test id", None)?;
        let project = self.text(args.project, "gcp-project", "GCP project", None)?;

        let mut request = ProbeRequest {
            test_id,
            project,
            target_ip: args.target_ip,
            source_ip: args.source_ip,
            source_port: args.source_port,
            operation: args.operation,
        };
        if request.operation == ProbeOperation::Create {
            request.target_ip = Some(self.text(
                request.target_ip,
                "target-db-ip",
                "Migration target IP address",
                None,
            )?);
            request.source_ip = Some(self.text(
                request.source_ip,
                "source-db-ip",
                "Source database IP address",
                None,
            )?);
            if request.source_port.is_none() {
                let answer = self.text(None, "source-db-port", "Source database port", None)?;
                request.source_port = Some(parse_port(&answer)?);
            }
        }
        request.validate()?;
        Ok(request)
    }

    /// Returns `value`, or asks for it with a hidden prompt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `value` is missing and there is no
    /// terminal.
    pub fn resolve_secret(&self, value: Option<String>, flag: &str, prompt: &str) -> Result<String> {
        match value {
            Some(value) => Ok(value),
            None => {
                self.require_terminal(flag)?;
                self.prompter.password(prompt)
            }
        }
    }

    /// Asks whether to go ahead. `no_prompt` skips the question.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if confirmation is needed but there is no
    /// terminal.
    pub fn confirm(&self, prompt: &str, no_prompt: bool) -> Result<bool> {
        if no_prompt {
            return Ok(true);
        }
        if !self.prompter.is_interactive() {
            return Err(Error::Config(
                "confirmation required but no terminal is attached; pass --no-prompt".to_string(),
            ));
        }
        self.prompter.confirm(prompt)
    }

    fn text(
        &self,
        value: Option<String>,
        flag: &str,
        prompt: &str,
        default: Option<&str>,
    ) -> Result<String> {
        if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
            return Ok(value);
        }
        self.require_terminal(flag)?;
        let answer = self.prompter.input(prompt, default)?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(Error::Config(format!("{flag} cannot be empty")));
        }
        Ok(answer.to_string())
    }

    fn require_terminal(&self, flag: &str) -> Result<()> {
        if self.prompter.is_interactive() {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "missing required parameter '{flag}' and no terminal to prompt for it"
            )))
        }
    }
}

fn parse_port(answer: &str) -> Result<u16> {
    match answer.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(Error::Config(format!("invalid port '{answer}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Answers prompts from a script and records what was asked.
    struct ScriptedPrompter {
        interactive: bool,
        answers: RefCell<VecDeque<String>>,
        asked: RefCell<Vec<String>>,
    }

    impl ScriptedPrompter {
        fn new(answers: &[&str]) -> Self {
            Self {
                interactive: true,
                answers: RefCell::new(answers.iter().map(|a| (*a).to_string()).collect()),
                asked: RefCell::new(Vec::new()),
            }
        }

        fn detached() -> Self {
            Self {
                interactive: false,
                ..Self::new(&[])
            }
        }

        fn next(&self, prompt: &str) -> String {
            self.asked.borrow_mut().push(prompt.to_string());
            self.answers.borrow_mut().pop_front().unwrap_or_default()
        }
    }

    impl Prompter for ScriptedPrompter {
        fn is_interactive(&self) -> bool {
            self.interactive
        }

        fn select_engine(&self, _engines: &[EngineKind]) -> Result<EngineKind> {
            self.next("engine").parse()
        }

        fn input(&self, prompt: &str, default: Option<&str>) -> Result<String> {
            let answer = self.next(prompt);
            Ok(match (answer.is_empty(), default) {
                (true, Some(default)) => default.to_string(),
                _ => answer,
            })
        }

        fn password(&self, prompt: &str) -> Result<String> {
            Ok(self.next(prompt))
        }

        fn confirm(&self, prompt: &str) -> Result<bool> {
            Ok(self.next(prompt) == "y")
        }
    }

    fn full_args() -> ConnectionArgs {
        ConnectionArgs {
            db_type: Some(EngineKind::MySql),
            hostname: Some("db01".to_string()),
            port: Some(3307),
            database: Some("shop".to_string()),
            username: Some("assessor".to_string()),
            password: Some("secret".to_string()),
            collection_identifier: None,
        }
    }

    // ==================== Connection Tests ====================

    #[test]
    fn test_complete_args_never_prompt() {
        // Arrange
        let prompter = ScriptedPrompter::new(&[]);
        let resolver = ParameterResolver::new(&prompter);

        // Act
        let params = resolver.resolve_connection(full_args()).unwrap();

        // Assert
        assert_eq!(params.port, 3307);
        assert!(prompter.asked.borrow().is_empty());
    }

    #[test]
    fn test_fills_only_missing_values() {
        // Arrange
        let prompter = ScriptedPrompter::new(&["orders", "hunter2"]);
        let resolver = ParameterResolver::new(&prompter);
        let args = ConnectionArgs {
            database: None,
            password: None,
            ..full_args()
        };

        // Act
        let params = resolver.resolve_connection(args).unwrap();

        // Assert
        assert_eq!(params.database, "orders");
        assert_eq!(params.password, "hunter2");
        assert_eq!(params.host, "db01");
        assert_eq!(
            *prompter.asked.borrow(),
            vec!["Database name", "Database password"]
        );
    }

    #[test]
    fn test_port_prompt_defaults_to_engine_port() {
        // Arrange
        let prompter = ScriptedPrompter::new(&["postgres", ""]);
        let resolver = ParameterResolver::new(&prompter);
        let args = ConnectionArgs {
            db_type: None,
            port: None,
            ..full_args()
        };

        // Act
        let params = resolver.resolve_connection(args).unwrap();

        // Assert
        assert_eq!(params.engine, EngineKind::Postgres);
        assert_eq!(params.port, 5432);
    }

    #[test]
    fn test_empty_answer_is_rejected() {
        let prompter = ScriptedPrompter::new(&["  "]);
        let resolver = ParameterResolver::new(&prompter);
        let args = ConnectionArgs {
            hostname: None,
            ..full_args()
        };

        let err = resolver.resolve_connection(args).unwrap_err();

        assert!(err.to_string().contains("hostname cannot be empty"));
    }

    #[test]
    fn test_missing_value_without_terminal_is_config_error() {
        let prompter = ScriptedPrompter::detached();
        let resolver = ParameterResolver::new(&prompter);
        let args = ConnectionArgs {
            username: None,
            ..full_args()
        };

        let err = resolver.resolve_connection(args).unwrap_err();

        assert_eq!(err.code(), "DMA-001");
        assert!(err.to_string().contains("'username'"));
    }

    #[test]
    fn test_missing_port_without_terminal_uses_engine_port() {
        let prompter = ScriptedPrompter::detached();
        let resolver = ParameterResolver::new(&prompter);
        let args = ConnectionArgs {
            db_type: Some(EngineKind::SqlServer),
            port: None,
            ..full_args()
        };

        let params = resolver.resolve_connection(args).unwrap();

        assert_eq!(params.port, 1433);
    }

    #[test]
    fn test_invalid_port_answer() {
        let prompter = ScriptedPrompter::new(&["70000"]);
        let resolver = ParameterResolver::new(&prompter);
        let args = ConnectionArgs {
            port: None,
            ..full_args()
        };

        assert!(resolver.resolve_connection(args).is_err());
    }

    // ==================== Probe Tests ====================

    #[test]
    fn test_probe_create_prompts_for_endpoints() {
        // Arrange
        let prompter = ScriptedPrompter::new(&["10.0.0.2", "10.0.0.9", "1433"]);
        let resolver = ParameterResolver::new(&prompter);
        let args = ProbeArgs {
            test_id: Some("dma-probe".to_string()),
            project: Some("acme".to_string()),
            ..Default::default()
        };

        // Act
        let request = resolver.resolve_probe(args).unwrap();

        // Assert
        assert_eq!(request.target_ip.as_deref(), Some("10.0.0.2"));
        assert_eq!(request.source_ip.as_deref(), Some("10.0.0.9"));
        assert_eq!(request.source_port, Some(1433));
    }

    #[test]
    fn test_probe_delete_skips_endpoints() {
        let prompter = ScriptedPrompter::new(&["acme"]);
        let resolver = ParameterResolver::new(&prompter);
        let args = ProbeArgs {
            test_id: Some("dma-probe".to_string()),
            operation: ProbeOperation::Delete,
            ..Default::default()
        };

        let request = resolver.resolve_probe(args).unwrap();

        assert_eq!(request.project, "acme");
        assert_eq!(*prompter.asked.borrow(), vec!["GCP project"]);
    }

    // ==================== Confirmation Tests ====================

    #[test]
    fn test_no_prompt_skips_confirmation() {
        let prompter = ScriptedPrompter::detached();
        let resolver = ParameterResolver::new(&prompter);

        assert!(resolver.confirm("Proceed?", true).unwrap());
        assert!(prompter.asked.borrow().is_empty());
    }

    #[test]
    fn test_confirmation_answer_is_returned() {
        let prompter = ScriptedPrompter::new(&["n"]);
        let resolver = ParameterResolver::new(&prompter);

        assert!(!resolver.confirm("Proceed?", false).unwrap());
    }

    #[test]
    fn test_confirmation_without_terminal_is_error() {
        let prompter = ScriptedPrompter::detached();
        let resolver = ParameterResolver::new(&prompter);

        assert!(matches!(resolver.confirm("Proceed?", false), Err(Error::Config(_))));
    }
}
