//! In-process radio stack.
//!
//! Records every send, hands out incrementing transaction sequence numbers
//! and can be told to refuse the next send. Used by the CLI `run` command
//! and by tests; it never calls back into the adapter on its own.

use parking_lot::Mutex;

use zigbridge_core::ids::{Eui64, NetworkAddress, SequenceNumber};

use crate::adapter::{RadioStack, ReportingConfig, SendResult, StackRejection};
use crate::zcl::{ColorCommand, OnOffCommand};

/// A send primitive invocation as seen by the stack.
#[derive(Debug, Clone, PartialEq)]
pub enum SentFrame {
    OnOff {
        nwk: NetworkAddress,
        endpoint: u8,
        command: OnOffCommand,
    },
    Level {
        nwk: NetworkAddress,
        endpoint: u8,
        level: u8,
        transition_ds: u16,
    },
    Color {
        nwk: NetworkAddress,
        endpoint: u8,
        command: ColorCommand,
    },
    ReadAttributes {
        nwk: NetworkAddress,
        endpoint: u8,
        cluster: u16,
        attributes: Vec<u16>,
    },
    ConfigureReporting {
        nwk: NetworkAddress,
        endpoint: u8,
        cluster: u16,
        attribute: u16,
        config: ReportingConfig,
    },
    Bind {
        nwk: NetworkAddress,
        ieee: Eui64,
        endpoint: u8,
        cluster: u16,
    },
}

#[derive(Debug, Default)]
struct SimState {
    next_seq: SequenceNumber,
    reject_next: Option<u16>,
    sent: Vec<(SequenceNumber, SentFrame)>,
    formation_requests: usize,
    permit_join: Option<u8>,
}

#[derive(Debug, Default)]
pub struct SimulatedStack {
    state: Mutex<SimState>,
}

impl SimulatedStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next send (or formation request) with `code`.
    pub fn reject_next(&self, code: u16) {
        self.state.lock().reject_next = Some(code);
    }

    /// Force the sequence number handed out by the next accepted send.
    pub fn set_next_sequence(&self, seq: SequenceNumber) {
        self.state.lock().next_seq = seq;
    }

    /// Accepted sends, oldest first.
    pub fn sent(&self) -> Vec<SentFrame> {
        self.state.lock().sent.iter().map(|(_, f)| f.clone()).collect()
    }

    /// Sequence number of the most recent accepted send.
    pub fn last_sequence(&self) -> Option<SequenceNumber> {
        self.state.lock().sent.last().map(|(seq, _)| *seq)
    }

    pub fn formation_requests(&self) -> usize {
        self.state.lock().formation_requests
    }

    pub fn permit_join_seconds(&self) -> Option<u8> {
        self.state.lock().permit_join
    }

    fn take_rejection(state: &mut SimState) -> Result<(), StackRejection> {
        match state.reject_next.take() {
            Some(code) => Err(StackRejection { code }),
            None => Ok(()),
        }
    }

    fn record(&self, frame: SentFrame) -> SendResult {
        let mut state = self.state.lock();
        Self::take_rejection(&mut state)?;
        let seq = state.next_seq;
        state.next_seq = seq.wrapping_add(1);
        tracing::trace!(seq, ?frame, "Simulated send");
        state.sent.push((seq, frame));
        Ok(seq)
    }
}

impl RadioStack for SimulatedStack {
    fn start_network(&self) -> Result<(), StackRejection> {
        let mut state = self.state.lock();
        Self::take_rejection(&mut state)?;
        state.formation_requests += 1;
        Ok(())
    }

    fn permit_join(&self, seconds: u8) -> Result<(), StackRejection> {
        let mut state = self.state.lock();
        Self::take_rejection(&mut state)?;
        state.permit_join = Some(seconds);
        Ok(())
    }

    fn send_on_off(&self, nwk: NetworkAddress, endpoint: u8, command: OnOffCommand) -> SendResult {
        self.record(SentFrame::OnOff {
            nwk,
            endpoint,
            command,
        })
    }

    fn send_level(
        &self,
        nwk: NetworkAddress,
        endpoint: u8,
        level: u8,
        transition_ds: u16,
    ) -> SendResult {
        self.record(SentFrame::Level {
            nwk,
            endpoint,
            level,
            transition_ds,
        })
    }

    fn send_color(&self, nwk: NetworkAddress, endpoint: u8, command: ColorCommand) -> SendResult {
        self.record(SentFrame::Color {
            nwk,
            endpoint,
            command,
        })
    }

    fn read_attributes(
        &self,
        nwk: NetworkAddress,
        endpoint: u8,
        cluster: u16,
        attributes: &[u16],
    ) -> SendResult {
        self.record(SentFrame::ReadAttributes {
            nwk,
            endpoint,
            cluster,
            attributes: attributes.to_vec(),
        })
    }

    fn configure_reporting(
        &self,
        nwk: NetworkAddress,
        endpoint: u8,
        cluster: u16,
        attribute: u16,
        config: ReportingConfig,
    ) -> SendResult {
        self.record(SentFrame::ConfigureReporting {
            nwk,
            endpoint,
            cluster,
            attribute,
            config,
        })
    }

    fn bind(&self, nwk: NetworkAddress, ieee: Eui64, endpoint: u8, cluster: u16) -> SendResult {
        self.record(SentFrame::Bind {
            nwk,
            ieee,
            endpoint,
            cluster,
        })
    }
}
