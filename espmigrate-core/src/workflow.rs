//! The two-phase migration, modelled as an explicit state machine.
//!
//! ```text
//! AwaitSourceConnect -> ConfirmSource -> Extracting
//!     -> AwaitDestConnect -> ConfirmDest -> Deploying -> Done
//! ```
//!
//! Every prompt can also lead to [`State::Aborted`]. A board in the wrong
//! encryption state (or one that could not be probed) sends the machine back
//! to the connect prompt of the same phase, so the operator can swap boards
//! and try again.
use std::cell::RefCell;
use std::fmt;

use crate::deploy;
use crate::efuse::{self, EncryptionState, Probe};
use crate::error::{Error, Result};
use crate::extract::{self, Step};
use crate::preflight;
use crate::staging::StagedImage;
use crate::tool::Toolchain;

/// Which board the workflow is dealing with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// The plain board images are read from.
    Source,
    /// The flash-encryption board images are written to.
    Destination,
}

impl Phase {
    /// The encryption state a board must be in for this phase.
    pub fn required_state(self) -> EncryptionState {
        match self {
            Phase::Source => EncryptionState::Inactive,
            Phase::Destination => EncryptionState::Active,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Source => f.write_str("source"),
            Phase::Destination => f.write_str("destination"),
        }
    }
}

/// Answer to a connect prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Connect {
    /// The board is attached; probe it.
    Ready,
    /// The operator interrupted the prompt.
    Cancelled,
}

/// Progress reported to the operator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Probed(Phase, Probe),
    /// The probed board is not in the state the phase requires.
    Rejected(Phase, EncryptionState),
    Step(Step),
    Extracted(Vec<StagedImage>),
    /// Deployment found this many staged files to write.
    DeployStarted(usize),
    Deployed(usize),
}

/// The person at the keyboard.
pub trait Operator {
    /// Waits until a board for `phase` has been connected.
    fn await_connect(&mut self, phase: Phase) -> Connect;

    /// Asks whether to start the phase. Anything but yes aborts the run.
    fn confirm(&mut self, phase: Phase) -> bool;

    /// Called for every event worth showing.
    fn notify(&mut self, event: &Event);
}

/// Why a run ended early.
#[derive(Debug)]
pub enum Abort {
    /// Interrupted at a connect prompt. Not a failure.
    Cancelled,
    Failed(Error),
}

#[derive(Debug)]
pub enum State {
    AwaitSourceConnect,
    ConfirmSource,
    Extracting,
    AwaitDestConnect,
    ConfirmDest,
    Deploying,
    Done,
    Aborted(Abort),
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Done | State::Aborted(_))
    }
}

/// How a run that did not fail ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Cancelled,
}

pub struct MigrationWorkflow<'a, O> {
    tools: Toolchain<'a>,
    operator: O,
}

impl<'a, O: Operator> MigrationWorkflow<'a, O> {
    pub fn new(tools: Toolchain<'a>, operator: O) -> Self {
        Self { tools, operator }
    }

    pub fn operator(&self) -> &O {
        &self.operator
    }

    pub fn into_operator(self) -> O {
        self.operator
    }

    /// Runs the migration from the first prompt to a terminal state.
    ///
    /// Refuses to start while staged images from an earlier run exist, before
    /// any board is probed.
    ///
    /// # Errors
    ///
    /// Any precondition failure, pipeline failure, or a declined confirmation.
    pub fn run(&mut self) -> Result<Outcome> {
        preflight::check_staging_dir(&self.tools.config().staging_dir)?;

        let mut state = State::AwaitSourceConnect;
        loop {
            state = match self.step(state) {
                State::Done => return Ok(Outcome::Completed),
                State::Aborted(Abort::Cancelled) => return Ok(Outcome::Cancelled),
                State::Aborted(Abort::Failed(e)) => return Err(e),
                next => next,
            };
        }
    }

    /// Performs one transition.
    pub fn step(&mut self, state: State) -> State {
        match state {
            State::AwaitSourceConnect => self.await_connect(Phase::Source),
            State::ConfirmSource => self.confirm(Phase::Source),
            State::Extracting => {
                let operator = &mut self.operator;
                let result = extract::run(&self.tools, |step| {
                    operator.notify(&Event::Step(step.clone()))
                });
                match result {
                    Ok(staged) => {
                        self.operator.notify(&Event::Extracted(staged));
                        State::AwaitDestConnect
                    }
                    Err(e) => State::Aborted(Abort::Failed(e)),
                }
            }
            State::AwaitDestConnect => self.await_connect(Phase::Destination),
            State::ConfirmDest => self.confirm(Phase::Destination),
            State::Deploying => {
                let operator = RefCell::new(&mut self.operator);
                let result = deploy::run(
                    &self.tools,
                    |count| operator.borrow_mut().notify(&Event::DeployStarted(count)),
                    |step| operator.borrow_mut().notify(&Event::Step(step.clone())),
                );
                match result {
                    Ok(count) => {
                        self.operator.notify(&Event::Deployed(count));
                        State::Done
                    }
                    Err(e) => State::Aborted(Abort::Failed(e)),
                }
            }
            terminal @ (State::Done | State::Aborted(_)) => terminal,
        }
    }

    fn await_connect(&mut self, phase: Phase) -> State {
        if self.operator.await_connect(phase) == Connect::Cancelled {
            return State::Aborted(Abort::Cancelled);
        }

        let probe = efuse::probe(&self.tools);
        self.operator.notify(&Event::Probed(phase, probe));

        if probe.state != phase.required_state() {
            log::warn!("{phase} board rejected: {}", probe.state);
            self.operator.notify(&Event::Rejected(phase, probe.state));
            return match phase {
                Phase::Source => State::AwaitSourceConnect,
                Phase::Destination => State::AwaitDestConnect,
            };
        }

        match phase {
            Phase::Source => State::ConfirmSource,
            Phase::Destination => State::ConfirmDest,
        }
    }

    fn confirm(&mut self, phase: Phase) -> State {
        if !self.operator.confirm(phase) {
            return State::Aborted(Abort::Failed(Error::Declined(phase)));
        }
        match phase {
            Phase::Source => State::Extracting,
            Phase::Destination => State::Deploying,
        }
    }
}
