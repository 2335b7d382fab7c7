//! Agent argument assembly
//!
//! The agent's command line is kept as a tagged token list and only turned
//! into strings when a pod spec is rendered. Order is fixed:
//! `run <command> -a <args> [-t <timer>] [-d <addr> -p <port>]`, followed by
//! the per-target `--pod <name> -n <namespace>` added at dispatch.

use crds::DEFAULT_RELAY_PORT;

/// Verb every agent invocation starts with
const VERB: &str = "run";

/// What to run, independent of where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandIntent {
    /// Command the agent executes inside the target
    pub command: String,
    /// Argument blob for the command
    pub args: String,
    /// Run length for timed commands
    pub timer: Option<String>,
    /// Where captured data is streamed
    pub sink: Option<DataSink>,
}

/// Relay sink address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSink {
    /// Host or IP
    pub address: String,
    /// Port; the agent's relay default when absent
    pub port: Option<String>,
}

/// Agent flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentFlag {
    /// `-a`
    Args,
    /// `-t`
    Timer,
    /// `-d`
    SinkAddress,
    /// `-p`
    SinkPort,
    /// `--pod`
    Pod,
    /// `-n`
    Namespace,
}

impl AgentFlag {
    /// Command-line spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentFlag::Args => "-a",
            AgentFlag::Timer => "-t",
            AgentFlag::SinkAddress => "-d",
            AgentFlag::SinkPort => "-p",
            AgentFlag::Pod => "--pod",
            AgentFlag::Namespace => "-n",
        }
    }
}

/// One element of the agent command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentToken {
    /// Bare word
    Positional(String),
    /// Flag followed by its value
    Flag {
        /// Which flag
        flag: AgentFlag,
        /// Its value
        value: String,
    },
}

/// Assembled agent arguments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentArgs {
    tokens: Vec<AgentToken>,
}

impl AgentArgs {
    /// Build the target-independent part of the command line
    pub fn assemble(intent: &CommandIntent) -> Self {
        let mut args = Self::default();
        args.positional(VERB);
        args.positional(&intent.command);
        args.flag(AgentFlag::Args, &intent.args);

        if let Some(timer) = &intent.timer {
            args.flag(AgentFlag::Timer, timer);
        }
        if let Some(sink) = &intent.sink {
            args.flag(AgentFlag::SinkAddress, &sink.address);
            match &sink.port {
                Some(port) => args.flag(AgentFlag::SinkPort, port),
                None => args.flag(AgentFlag::SinkPort, &DEFAULT_RELAY_PORT.to_string()),
            }
        }
        args
    }

    /// Copy with the per-target flags appended
    #[must_use]
    pub fn targeting(&self, pod: &str, namespace: &str) -> Self {
        let mut args = self.clone();
        args.flag(AgentFlag::Pod, pod);
        args.flag(AgentFlag::Namespace, namespace);
        args
    }

    /// Render to the string vector a container spec expects
    pub fn to_args(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.tokens.len() * 2);
        for token in &self.tokens {
            match token {
                AgentToken::Positional(word) => out.push(word.clone()),
                AgentToken::Flag { flag, value } => {
                    out.push(flag.as_str().to_string());
                    out.push(value.clone());
                }
            }
        }
        out
    }

    /// True when nothing has been assembled
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    fn positional(&mut self, word: &str) {
        self.tokens.push(AgentToken::Positional(word.to_string()));
    }

    fn flag(&mut self, flag: AgentFlag, value: &str) {
        self.tokens.push(AgentToken::Flag {
            flag,
            value: value.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ps() -> CommandIntent {
        CommandIntent {
            command: "ps".to_string(),
            args: "-ef".to_string(),
            timer: None,
            sink: None,
        }
    }

    #[test]
    fn test_base_order() {
        assert_eq!(AgentArgs::assemble(&ps()).to_args(), vec!["run", "ps", "-a", "-ef"]);
    }

    #[test]
    fn test_assemble_is_deterministic() {
        let intent = CommandIntent {
            timer: Some("30s".to_string()),
            ..ps()
        };
        assert_eq!(AgentArgs::assemble(&intent), AgentArgs::assemble(&intent));
    }

    #[test]
    fn test_timer_appends_exactly_one_pair() {
        let base = AgentArgs::assemble(&ps()).to_args();
        let timed = AgentArgs::assemble(&CommandIntent {
            timer: Some("30s".to_string()),
            ..ps()
        })
        .to_args();
        assert_eq!(&timed[..base.len()], &base[..]);
        assert_eq!(&timed[base.len()..], &["-t", "30s"]);
    }

    #[test]
    fn test_sink_appends_address_and_port() {
        let base = AgentArgs::assemble(&ps()).to_args();
        let sunk = AgentArgs::assemble(&CommandIntent {
            sink: Some(DataSink {
                address: "10.0.0.9".to_string(),
                port: Some("6000".to_string()),
            }),
            ..ps()
        })
        .to_args();
        assert_eq!(&sunk[base.len()..], &["-d", "10.0.0.9", "-p", "6000"]);
    }

    #[test]
    fn test_sink_without_port_uses_relay_default() {
        let args = AgentArgs::assemble(&CommandIntent {
            sink: Some(DataSink {
                address: "relay.ops.svc".to_string(),
                port: None,
            }),
            ..ps()
        })
        .to_args();
        assert_eq!(&args[args.len() - 4..], &["-d", "relay.ops.svc", "-p", "51001"]);
    }

    #[test]
    fn test_timer_precedes_sink() {
        let args = AgentArgs::assemble(&CommandIntent {
            timer: Some("5m".to_string()),
            sink: Some(DataSink {
                address: "10.0.0.9".to_string(),
                port: Some("51001".to_string()),
            }),
            ..ps()
        })
        .to_args();
        assert_eq!(
            args,
            vec!["run", "ps", "-a", "-ef", "-t", "5m", "-d", "10.0.0.9", "-p", "51001"]
        );
    }

    #[test]
    fn test_targeting_leaves_base_untouched() {
        let base = AgentArgs::assemble(&ps());
        let targeted = base.targeting("w-1", "ns1");
        assert_eq!(base.to_args().len(), 4);
        assert_eq!(
            targeted.to_args(),
            vec!["run", "ps", "-a", "-ef", "--pod", "w-1", "-n", "ns1"]
        );
        assert_eq!(
            targeted.tokens.last(),
            Some(&AgentToken::Flag {
                flag: AgentFlag::Namespace,
                value: "ns1".to_string()
            })
        );
    }
}
