use anyhow::{Context, Result};
use clap::Parser;
use console::{Term, style};
use dialoguer::{Confirm, theme::ColorfulTheme};
use espmigrate_core::config::Config;
use espmigrate_core::efuse::EncryptionState;
use espmigrate_core::extract::Step;
use espmigrate_core::tool::{ProcessInvoker, Toolchain};
use espmigrate_core::workflow::{Connect, Event, MigrationWorkflow, Operator, Outcome, Phase};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, IsTerminal, Write, stdout};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[cfg(unix)]
use libc::ECHOCTL;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;
#[cfg(unix)]
use termios::{TCSANOW, Termios, tcsetattr};

mod logging;

#[derive(Parser)]
#[command(name = "espmigrate")]
#[command(
    about = "Copy ESP32 flash images from a plain board to a flash-encryption board",
    version
)]
struct Cli {
    /// Configuration file [default: ./espmigrate.toml if present]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// A helper struct that, on Unix, disables `ECHOCTL` for the terminal.
///
/// With `ECHOCTL` off, cancelling a connect prompt with Ctrl+C does not leave
/// a stray `^C` behind. The original terminal state is restored on drop.
struct TermRestorer {
    #[cfg(unix)]
    original_termios: Option<Termios>,
}

impl TermRestorer {
    fn new() -> Self {
        #[cfg(unix)]
        {
            let fd = stdout().as_raw_fd();
            let original_termios = stdout()
                .is_terminal()
                .then(|| Termios::from_fd(fd).ok())
                .flatten()
                .filter(|original| {
                    let mut quiet = *original;
                    quiet.c_lflag &= !ECHOCTL;
                    tcsetattr(fd, TCSANOW, &quiet).is_ok()
                });
            Self { original_termios }
        }
        #[cfg(not(unix))]
        {
            Self {}
        }
    }
}

impl Drop for TermRestorer {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(ref original_termios) = self.original_termios {
            tcsetattr(stdout().as_raw_fd(), TCSANOW, original_termios).ok();
        }
    }
}

/// Presents a final "Yes/No" confirmation to the user.
fn confirm_operation(prompt: &str) -> Result<bool> {
    let confirmation = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()?;

    Ok(confirmation)
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{prefix:12} [{elapsed_precise}] {spinner:.blue} {msg}")
        .unwrap()
        .tick_strings(&["■  ", " ■ ", "  ■", " ■ ", "■■■"])
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{prefix:12} [{elapsed_precise}] [{bar:40.green/black}] {pos}/{len} {msg}")
        .unwrap()
        .progress_chars("■ ")
}

/// Where the operator's answers come from.
enum Input {
    /// An interactive terminal: single key presses and dialoguer prompts.
    Terminal(Term),
    /// Anything else, such as a pipe: one answer per line.
    Lines(Box<dyn BufRead>),
}

impl Input {
    /// Uses the terminal behind stderr, so `espmigrate | tee log` still
    /// prompts interactively. Without one, answers are read line by line.
    fn detect() -> Self {
        let term = Term::stderr();
        if term.is_term() {
            Input::Terminal(term)
        } else {
            Input::Lines(Box::new(io::stdin().lock()))
        }
    }
}

/// Reads one answer, `None` at end of input.
fn read_answer(input: &mut dyn BufRead) -> io::Result<Option<String>> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes")
}

/// The interactive operator: prompts on the terminal and shows progress.
struct Console {
    input: Input,
    running: Arc<AtomicBool>,
    spinner: Option<ProgressBar>,
    deploy_bar: Option<ProgressBar>,
}

impl Console {
    fn new(running: Arc<AtomicBool>) -> Self {
        Self::with_input(running, Input::detect())
    }

    fn with_input(running: Arc<AtomicBool>, input: Input) -> Self {
        Self {
            input,
            running,
            spinner: None,
            deploy_bar: None,
        }
    }

    fn finish_step(&mut self) {
        if let Some(pb) = self.spinner.take() {
            pb.finish_with_message(format!("{} {}", style("✔").green(), pb.message()));
        }
    }

    /// Marks whatever was in progress as failed.
    fn abandon(&mut self) {
        if let Some(pb) = self.spinner.take() {
            pb.abandon_with_message(format!("❌ {}", pb.message()));
        }
        if let Some(bar) = self.deploy_bar.take() {
            bar.abandon_with_message("❌ Operation failed.");
        }
    }

    fn start_step(&mut self, step: &Step) {
        self.finish_step();

        let prefix = match step {
            Step::Read(_) => "Reading",
            Step::Encrypt(_) => "Encrypting",
            Step::Write(_) => "Writing",
        };
        let message = format!("===> {}", style(step.artifact()).cyan());

        if let Some(bar) = &self.deploy_bar {
            if bar.message().is_empty() {
                bar.set_message(message);
            } else {
                bar.println(format!("  {} {}", style("✔").green(), bar.message()));
                bar.inc(1);
                bar.set_message(message);
            }
            return;
        }

        let pb = ProgressBar::new_spinner();
        pb.set_style(spinner_style());
        pb.set_prefix(prefix);
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(120));
        self.spinner = Some(pb);
    }
}

impl Operator for Console {
    fn await_connect(&mut self, phase: Phase) -> Connect {
        let prompt = match phase {
            Phase::Source => "Connect the source board",
            Phase::Destination => "Connect the target board in encryption mode",
        };
        let label = style("ESP32:").cyan().bold();

        let answered = match &mut self.input {
            Input::Terminal(term) => {
                println!("\n{label} {prompt} and press any key");
                term.read_key().map(|_| true)
            }
            Input::Lines(lines) => {
                println!("\n{label} {prompt} and press Enter");
                read_answer(lines.as_mut()).map(|answer| answer.is_some())
            }
        };

        match answered {
            Ok(true) if self.running.load(Ordering::SeqCst) => {
                println!("Please wait..");
                Connect::Ready
            }
            Ok(_) => Connect::Cancelled,
            Err(e) => {
                log::debug!("connect prompt ended: {e}");
                Connect::Cancelled
            }
        }
    }

    fn confirm(&mut self, phase: Phase) -> bool {
        let prompt = match phase {
            Phase::Source => "Really start downloading?",
            Phase::Destination => "Really start flashing?",
        };
        let answer = match &mut self.input {
            Input::Terminal(_) => confirm_operation(prompt),
            Input::Lines(lines) => {
                print!("{prompt} [y/N] ");
                stdout().flush().ok();
                read_answer(lines.as_mut())
                    .map(|answer| answer.is_some_and(|a| is_yes(&a)))
                    .map_err(Into::into)
            }
        };
        match answer {
            Ok(yes) => yes,
            Err(e) => {
                log::debug!("confirmation prompt ended: {e}");
                false
            }
        }
    }

    fn notify(&mut self, event: &Event) {
        match event {
            Event::Probed(_, probe) => {
                let state = match probe.state {
                    EncryptionState::Active => style(probe.state).green(),
                    EncryptionState::Inactive => style(probe.state).yellow(),
                    EncryptionState::Indeterminate => style(probe.state).red(),
                };
                println!("{} ({})", probe.reading, state);
            }
            Event::Rejected(phase, state) => {
                let reason = match (phase, state) {
                    (_, EncryptionState::Indeterminate) => {
                        "Could not read the flash encryption state.."
                    }
                    (Phase::Source, _) => "The board is in encryption mode..",
                    (Phase::Destination, _) => "The board is not in encryption mode..",
                };
                println!("{}", style(reason).red());
            }
            Event::Step(step) => self.start_step(step),
            Event::Extracted(images) => {
                self.finish_step();
                println!("\n✨ Staged {} image(s):", style(images.len()).cyan());
                for image in images {
                    let kind = if image.encrypted {
                        style("encrypted").green()
                    } else {
                        style("plain").yellow()
                    };
                    println!("  {:<40} {}", image.file_name(), kind);
                }
            }
            Event::DeployStarted(count) => {
                let bar = ProgressBar::new(*count as u64);
                bar.set_style(bar_style());
                bar.set_prefix("Writing");
                bar.enable_steady_tick(Duration::from_millis(120));
                self.deploy_bar = Some(bar);
            }
            Event::Deployed(count) => {
                if let Some(bar) = self.deploy_bar.take() {
                    if !bar.message().is_empty() {
                        bar.println(format!("  {} {}", style("✔").green(), bar.message()));
                        bar.inc(1);
                    }
                    bar.finish_with_message("Write complete.");
                }
                println!(
                    "\n✨ Successfully wrote {} image(s) to the encrypted board.",
                    style(count).cyan()
                );
            }
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    // This guard will be dropped when main() exits, restoring the terminal.
    let _term_restorer = TermRestorer::new();

    // Ctrl+C outside a raw-mode prompt only flips this flag; the next connect
    // prompt turns it into a cancellation.
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    espmigrate_core::preflight::check_environment(&mut config)?;

    let invoker = ProcessInvoker;
    let tools = Toolchain::new(&config, &invoker);
    let mut workflow = MigrationWorkflow::new(tools, Console::new(running));

    let result = workflow.run();
    let mut console = workflow.into_operator();

    match result {
        Ok(Outcome::Completed) => Ok(()),
        Ok(Outcome::Cancelled) => {
            console.abandon();
            Ok(())
        }
        Err(e) => {
            console.abandon();
            Err(e.into())
        }
    }
}
