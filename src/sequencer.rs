//! Multi-step command exchanges.
//!
//! A [`Procedure`] is an explicit state machine: it names the next command to
//! send, and is resumed with the outcome of that command to decide what comes
//! next. A [`Sequencer`] enforces that exactly one step is outstanding and that
//! a finished procedure is never resumed. [`Sequencer::run`] drives it over a
//! channel, one round trip per step; dropping that future abandons the
//! procedure without resuming it.

use crate::channel::ChannelHandle;
use crate::error::{Error, Result};
use crate::protocol::command::{Command, Response};

/// One completed round trip.
#[derive(Debug)]
pub struct Exchange {
    /// Text of the command that was sent.
    pub request: String,
    /// The response, or the error the command ended with.
    pub outcome: Result<Response>,
}

/// What a procedure wants next.
#[derive(Debug)]
pub enum Step<T> {
    /// Send this command and resume with its outcome.
    Send(Command),
    /// Terminate with this result.
    Finish(Result<T>),
}

/// A multi-step exchange written as a state machine.
pub trait Procedure: Send {
    type Output: Send;

    /// Returns the first step.
    fn begin(&mut self) -> Step<Self::Output>;

    /// Consumes the outcome of the previous `Send` step and returns the next one.
    fn resume(&mut self, exchange: Exchange) -> Step<Self::Output>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Idle,
    Waiting(String),
    Finished,
}

/// Drives a [`Procedure`], one step at a time.
pub struct Sequencer<P> {
    procedure: P,
    state: State,
}

impl<P: Procedure> Sequencer<P> {
    /// Wraps a procedure without starting it.
    #[must_use]
    pub const fn new(procedure: P) -> Self {
        Self {
            procedure,
            state: State::Idle,
        }
    }

    /// Returns true once the procedure has terminated.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state == State::Finished
    }

    /// Returns true while a step waits for its outcome.
    #[must_use]
    pub const fn is_waiting(&self) -> bool {
        matches!(self.state, State::Waiting(_))
    }

    /// Starts the procedure and returns its first step.
    pub fn start(&mut self) -> Result<Step<P::Output>> {
        match self.state {
            State::Idle => {
                let step = self.procedure.begin();
                Ok(self.track(step))
            }
            State::Waiting(_) => Err(Error::Protocol {
                message: "sequence already started".into(),
            }),
            State::Finished => Err(Error::SequenceFinished),
        }
    }

    /// Resumes the outstanding step with its outcome.
    pub fn resume(&mut self, outcome: Result<Response>) -> Result<Step<P::Output>> {
        let request = match std::mem::replace(&mut self.state, State::Idle) {
            State::Waiting(request) => request,
            State::Idle => {
                return Err(Error::Protocol {
                    message: "sequence resumed before it was started".into(),
                });
            }
            State::Finished => {
                self.state = State::Finished;
                return Err(Error::SequenceFinished);
            }
        };

        tracing::trace!("sequence resumed after {:?}", request);
        let step = self.procedure.resume(Exchange { request, outcome });
        Ok(self.track(step))
    }

    fn track(&mut self, step: Step<P::Output>) -> Step<P::Output> {
        self.state = match &step {
            Step::Send(command) => State::Waiting(command.text().to_owned()),
            Step::Finish(_) => State::Finished,
        };
        step
    }

    /// Runs the procedure to completion over `channel`.
    ///
    /// If a step's command is cancelled the procedure is abandoned without
    /// being resumed, and the run ends with [`Error::Cancelled`].
    pub async fn run(mut self, channel: &ChannelHandle) -> Result<P::Output> {
        let mut step = self.start()?;
        loop {
            match step {
                Step::Send(command) => {
                    let outcome = channel.enqueue(command).await;
                    if matches!(outcome, Err(Error::Cancelled)) {
                        tracing::debug!("sequence abandoned while waiting on {:?}", self.state);
                        return Err(Error::Cancelled);
                    }
                    step = self.resume(outcome)?;
                }
                Step::Finish(result) => return result,
            }
        }
    }
}
