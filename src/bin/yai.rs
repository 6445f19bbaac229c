use anyhow::{bail, Result};
use clap::Parser;
use crossterm::style::Stylize;
use std::io::{IsTerminal, Write};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader, Lines, Stdin};
use tracing_subscriber::EnvFilter;
use yai::config::Config;
use yai::state::{ConversationEngine, EngineError};
use yai::tools::CommandRunner;
use yai::types::{ExecResult, Mode, StreamEvent};

#[derive(Parser)]
#[command(
    name = "yai",
    version,
    about = "Terminal assistant: shell commands or answers from plain language"
)]
struct Cli {
    /// Start in exec mode (generate a shell command)
    #[arg(short, long, conflicts_with = "chat")]
    exec: bool,
    /// Start in chat mode (markdown answers)
    #[arg(short, long)]
    chat: bool,
    /// Prompt to answer once; starts the interactive session when omitted
    prompt: Vec<String>,
}

impl Cli {
    fn requested_mode(&self) -> Option<Mode> {
        match (self.exec, self.chat) {
            (true, _) => Some(Mode::Exec),
            (_, true) => Some(Mode::Chat),
            _ => None,
        }
    }
}

const HELP: &str = "Commands:
  /mode    toggle between exec and chat mode
  /exec    switch to exec mode
  /chat    switch to chat mode
  /clear   clear the current mode's conversation
  /reset   clear both conversations
  /help    show this help
  /quit    leave
Ctrl-C interrupts a streaming answer.";

struct Session {
    engine: ConversationEngine,
    events: tokio::sync::mpsc::UnboundedReceiver<StreamEvent>,
    runner: CommandRunner,
    input: Option<Lines<BufReader<Stdin>>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = Config::load()?;
    config.validate()?;

    let (mut engine, events) = ConversationEngine::from_config(&config)?;
    if let Some(mode) = cli.requested_mode() {
        engine = engine.with_explicit_mode(mode);
    }

    let interactive = std::io::stdin().is_terminal();
    if !interactive {
        let mut pipe = String::new();
        tokio::io::stdin().read_to_string(&mut pipe).await?;
        engine.set_pipe(&pipe);
    }

    let mut session = Session {
        engine,
        events,
        runner: CommandRunner::from_env(),
        input: interactive.then(|| BufReader::new(tokio::io::stdin()).lines()),
    };

    let prompt = cli.prompt.join(" ");
    if !prompt.trim().is_empty() {
        return session.submit(prompt.trim()).await;
    }
    if !interactive {
        bail!("a prompt argument is required when input is piped");
    }
    session.repl().await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("YAI_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

impl Session {
    async fn repl(&mut self) -> Result<()> {
        println!(
            "{} {}",
            "yai".bold().magenta(),
            format!("({} mode, /help for commands)", self.engine.mode()).dark_grey()
        );

        loop {
            print!("{} ", format!("[{}] >", self.engine.mode()).bold().cyan());
            std::io::stdout().flush()?;

            let Some(line) = self.read_line().await? else {
                println!();
                return Ok(());
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match line {
                "/quit" | "/exit" => return Ok(()),
                "/help" => println!("{HELP}"),
                "/mode" => self.switch_mode(self.engine.mode().toggled()),
                "/exec" => self.switch_mode(Mode::Exec),
                "/chat" => self.switch_mode(Mode::Chat),
                "/clear" => {
                    self.engine.clear();
                    println!("{}", "conversation cleared".dark_grey());
                }
                "/reset" => {
                    self.engine.reset();
                    println!("{}", "conversations reset".dark_grey());
                }
                command if command.starts_with('/') => {
                    println!("{}", format!("unknown command {command}, try /help").yellow());
                }
                input => {
                    if let Err(error) = self.submit(input).await {
                        eprintln!("{} {error:#}", "error:".red().bold());
                    }
                }
            }
        }
    }

    async fn read_line(&mut self) -> Result<Option<String>> {
        match self.input.as_mut() {
            Some(lines) => Ok(lines.next_line().await?),
            None => Ok(None),
        }
    }

    fn switch_mode(&mut self, mode: Mode) {
        let previous = self.engine.mode();
        if previous == mode {
            return;
        }
        self.engine.set_mode(mode);
        self.engine.add_terminal_output(&format!(
            "Switched from {previous} mode to {mode} mode. Context from previous conversation was preserved."
        ));
        println!("{}", format!("switched to {mode} mode").dark_grey());
    }

    async fn submit(&mut self, input: &str) -> Result<()> {
        match self.engine.mode() {
            Mode::Exec => self.exec(input).await,
            Mode::Chat => self.chat(input).await,
        }
    }

    async fn exec(&mut self, input: &str) -> Result<()> {
        let result = tokio::select! {
            result = self.engine.exec_completion(input) => result?,
            _ = tokio::signal::ctrl_c() => {
                println!("{}", "[Interrupt]".yellow());
                return Ok(());
            }
        };
        self.present_command(result).await
    }

    async fn present_command(&mut self, result: ExecResult) -> Result<()> {
        if !result.executable || result.command.trim().is_empty() {
            println!("{}", result.explanation);
            return Ok(());
        }

        println!("\n  {}\n", result.command.as_str().bold().green());
        if !result.explanation.is_empty() {
            println!("{}", result.explanation.as_str().dark_grey());
        }

        if self.input.is_none() {
            return Ok(());
        }
        print!("{} ", "run this command? [y/N]".bold());
        std::io::stdout().flush()?;
        let confirmed = self
            .read_line()
            .await?
            .is_some_and(|answer| matches!(answer.trim(), "y" | "Y" | "yes"));
        if !confirmed {
            return Ok(());
        }

        let outcome = self.runner.run(&result.command).await?;
        if !outcome.success {
            let code = outcome
                .code
                .map_or_else(|| "signal".to_string(), |code| code.to_string());
            eprintln!("{}", format!("command failed ({code})").red());
        }
        self.engine
            .add_terminal_output(&outcome.feedback(&result.command));
        Ok(())
    }

    async fn chat(&mut self, input: &str) -> Result<()> {
        let Session { engine, events, .. } = self;
        let handle = engine.interrupt_handle();
        let completion = engine.chat_stream_completion(input);
        tokio::pin!(completion);

        let mut outcome: Option<Result<(), EngineError>> = None;
        let mut stdout = std::io::stdout();
        loop {
            tokio::select! {
                result = &mut completion, if outcome.is_none() => {
                    let failed = result.is_err();
                    outcome = Some(result);
                    if failed {
                        break;
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else { break };
                    if event.is_interrupted {
                        writeln!(stdout, "\n{}", event.content.as_str().yellow())?;
                        break;
                    }
                    write!(stdout, "{}", event.content)?;
                    stdout.flush()?;
                    if event.is_final {
                        writeln!(stdout)?;
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    handle.interrupt();
                }
            }
        }

        let outcome = match outcome {
            Some(outcome) => outcome,
            None => completion.await,
        };
        Ok(outcome?)
    }
}
