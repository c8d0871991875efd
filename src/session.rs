//! Session lifecycle: connect, handshake, link recovery, and the single
//! `operate` primitive everything else in the crate is built on.

use std::net::ToSocketAddrs;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, warn};

use crate::error::{Result, VicpError};
use crate::frame::{decode_header, encode_command, ResponseAssembler, HEADER_SIZE};
use crate::transport::Transport;
use crate::wavedesc::{self, WaveDesc};

/// Connection classification of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No socket; either never connected or the last transport op failed.
    Down,
    /// Mid-`init`.
    Recovering,
    /// Socket connected and handshake complete; commands may be issued.
    Ok,
    /// Reachable but the template/identity probe failed, or the peer
    /// refused the connection outright.
    Unsupported,
}

/// Priority the original driver requested for its monitor task. Rust's
/// std has no portable thread-priority knob, so this is carried only for
/// API parity with the original tunable surface -- see the crate's design
/// notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SupervisorPriority {
    /// Lowest priority tier.
    Low,
    /// Default tier; matches the original's `epicsThreadPriorityMedium`.
    Medium,
    /// Highest priority tier.
    High,
}

/// Configuration for one [`Session`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionConfig {
    /// Dotted-quad IPv4 address; the instrument is always addressed at
    /// `<ip>:1861`.
    pub ip: String,
    /// 2 or 4; fixes which channel indices `Session` will accept.
    pub channels: u8,
    /// Whether the host wants a [`supervisor::Supervisor`] running.
    pub auto_recover: bool,
    /// Deadline for the initial TCP connect.
    pub connect_timeout_secs: f64,
    /// Deadline for each frame read once connected.
    pub read_timeout_secs: f64,
    /// Sleep between the background supervisor's recovery attempts.
    pub supervisor_interval_secs: f64,
    /// Carried for parity with the original tunable surface; see
    /// [`SupervisorPriority`].
    pub supervisor_priority: SupervisorPriority,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ip: String::new(),
            channels: 4,
            auto_recover: true,
            connect_timeout_secs: 6.0,
            read_timeout_secs: 6.0,
            supervisor_interval_secs: 30.0,
            supervisor_priority: SupervisorPriority::Medium,
        }
    }
}

/// A field of the `*IDN?` response, as `VENDOR, MODEL, SERIAL, VERSION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityField {
    /// First comma-separated field.
    Vendor,
    /// Second field.
    Model,
    /// Third field.
    Serial,
    /// Fourth field.
    Version,
}

const INIT_STRING: &str = "CFMT OFF,BYTE,BIN; CHDR OFF; CORD LO; WFSU SP,0,NP,0,FP,0,SN,0";
const TEMPLATE_TAG: &str = "LECROY_2_3";

/// `(name, index)` for every legal channel of a 2-channel scope: C1, C2,
/// and the math traces TA, TB.
const CHANNELS_2: [(&str, u8); 4] = [("C1", 1), ("C2", 2), ("TA", 5), ("TB", 6)];

/// `(name, index)` for every legal channel of a 4-channel scope.
const CHANNELS_4: [(&str, u8); 8] = [
    ("C1", 1),
    ("C2", 2),
    ("C3", 3),
    ("C4", 4),
    ("TA", 5),
    ("TB", 6),
    ("TC", 7),
    ("TD", 8),
];

fn channel_table(channels: u8) -> &'static [(&'static str, u8)] {
    if channels == 2 {
        &CHANNELS_2
    } else {
        &CHANNELS_4
    }
}

pub(crate) fn channel_name(channels: u8, index: u8) -> Option<&'static str> {
    channel_table(channels)
        .iter()
        .find(|(_, i)| *i == index)
        .map(|(name, _)| *name)
}

fn channel_index(channels: u8, name: &str) -> Option<u8> {
    channel_table(channels)
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, i)| *i)
}

/// Everything guarded by `session_lock`: the socket itself, the
/// connection state machine, and the channel-enabled cache.
///
/// `channel_enabled` lives here rather than in `Descriptors` so that a
/// preflight check against it and the `operate()` call it guards happen
/// under one held lock -- matching the original driver, which holds
/// `semLecroy` for the full body of `LeCroy_Read`/`LeCroy_Ioctl` and reads
/// `chanenbl` under that same lock, never under `semOp`. Splitting the
/// check and the command across two independent lock acquisitions would
/// let another thread flip the flag in between.
pub(crate) struct Wire {
    transport: Option<Transport>,
    pub(crate) link_state: LinkState,
    last_error: Option<crate::error::ErrorCode>,
    pub(crate) channel_enabled: [bool; 9],
}

/// Everything guarded by `descriptor_lock`: state read far more often than
/// it's written, so it is kept off the hot `session_lock` path.
pub(crate) struct Descriptors {
    model: String,
    pub(crate) channel_desc: [Option<WaveDesc>; 9],
}

/// One oscilloscope connection.
///
/// Cheap to share across threads behind an `Arc`: the dispatcher thread
/// that issues commands, the background link supervisor, and any
/// accessor callers all hold the same `Session`.
pub struct Session {
    ip: String,
    channels: u8,
    auto_recover: bool,
    connect_timeout: Duration,
    read_timeout: Duration,
    wire: Mutex<Wire>,
    descriptors: Mutex<Descriptors>,
    stop_mutex: Mutex<bool>,
    stop_cv: Condvar,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            ip: config.ip,
            channels: config.channels,
            auto_recover: config.auto_recover,
            connect_timeout: Duration::from_secs_f64(config.connect_timeout_secs),
            read_timeout: Duration::from_secs_f64(config.read_timeout_secs),
            wire: Mutex::new(Wire {
                transport: None,
                link_state: LinkState::Down,
                last_error: None,
                channel_enabled: [false; 9],
            }),
            descriptors: Mutex::new(Descriptors {
                model: String::new(),
                channel_desc: std::array::from_fn(|_| None),
            }),
            stop_mutex: Mutex::new(false),
            stop_cv: Condvar::new(),
        }
    }

    pub fn auto_recover(&self) -> bool {
        self.auto_recover
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn get_ip(&self) -> &str {
        &self.ip
    }

    pub fn get_link_state(&self) -> LinkState {
        self.lock_wire().link_state
    }

    pub fn get_last_error(&self) -> Option<crate::error::ErrorCode> {
        self.lock_wire().last_error
    }

    pub fn get_model(&self) -> String {
        self.lock_descriptors().model.clone()
    }

    /// Re-issues `*IDN?` and returns one comma-separated field of
    /// `VENDOR, MODEL, SERIAL, VERSION`.
    pub fn get_identity_field(&self, field: IdentityField) -> Result<String> {
        let idn = self.operate("*IDN?", true)?;
        let text = String::from_utf8_lossy(&idn);
        let text = text.trim_end_matches(['\0', '\n', '\r']);
        let idx = match field {
            IdentityField::Vendor => 0,
            IdentityField::Model => 1,
            IdentityField::Serial => 2,
            IdentityField::Version => 3,
        };
        text.split(',')
            .map(str::trim)
            .nth(idx)
            .map(str::to_string)
            .ok_or(VicpError::InitIdnError)
    }

    pub(crate) fn lock_wire(&self) -> MutexGuard<'_, Wire> {
        self.wire.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lock_descriptors(&self) -> MutexGuard<'_, Descriptors> {
        self.descriptors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Write one VICP frame carrying `command`; if `expect_response`, read
    /// frames until EOI and return the concatenated payload.
    ///
    /// Fails immediately with [`VicpError::NotReady`] unless the link is
    /// `OK`. Any transport failure during the exchange transitions the
    /// link to `Down` and is reported without touching `channel_enabled`
    /// or `channel_desc` -- those are only ever updated by the callers
    /// that issued the command, once they've seen a good reply.
    pub fn operate(&self, command: &str, expect_response: bool) -> Result<Vec<u8>> {
        let mut wire = self.lock_wire();
        self.operate_wire(&mut wire, command, expect_response)
    }

    /// Same as [`Session::operate`], but for callers that already hold the
    /// `session_lock` guard -- e.g. a channel-enabled preflight check that
    /// must not release the lock between the check and the command send.
    pub(crate) fn operate_wire(
        &self,
        wire: &mut Wire,
        command: &str,
        expect_response: bool,
    ) -> Result<Vec<u8>> {
        assert!(!command.is_empty(), "operate called with an empty command");

        if wire.link_state != LinkState::Ok {
            return Err(VicpError::NotReady);
        }
        let transport = wire
            .transport
            .as_mut()
            .expect("link state OK implies a live transport");

        match Self::exchange(transport, command, expect_response, self.read_timeout) {
            Ok(payload) => Ok(payload),
            Err(e) => {
                if e.is_transport() {
                    warn!("{}: transport error on {command:?}: {e}", self.ip);
                    wire.transport = None;
                    wire.link_state = LinkState::Down;
                    wire.last_error = Some(e.code());
                }
                Err(e)
            }
        }
    }

    fn exchange(
        transport: &mut Transport,
        command: &str,
        expect_response: bool,
        deadline: Duration,
    ) -> Result<Vec<u8>> {
        transport.write_all(&encode_command(command))?;
        if !expect_response {
            return Ok(Vec::new());
        }

        let mut assembler = ResponseAssembler::new();
        loop {
            let mut header_buf = [0u8; HEADER_SIZE];
            transport.read_exact(&mut header_buf, deadline)?;
            let header = decode_header(&header_buf)?;

            let mut payload = vec![0u8; header.payload_len as usize];
            if !payload.is_empty() {
                transport.read_exact(&mut payload, deadline)?;
            }
            if let Some(response) = assembler.feed(&header, &payload)? {
                return Ok(response);
            }
        }
    }

    /// Runs the connect -> template -> identity -> channel-status
    /// handshake, transitioning the link to `Ok` on success or `Down`/
    /// `Unsupported` on failure (see [`LinkState`]).
    pub fn init(&self) -> Result<()> {
        self.lock_wire().link_state = LinkState::Recovering;

        match self.connect_and_handshake() {
            Ok((transport, model, enabled)) => {
                {
                    let mut wire = self.lock_wire();
                    wire.transport = Some(transport);
                    wire.link_state = LinkState::Ok;
                    wire.last_error = None;
                    wire.channel_enabled = enabled;
                }
                let mut desc = self.lock_descriptors();
                desc.model = model;
                debug!("{}: session ready, model {}", self.ip, desc.model);
                Ok(())
            }
            Err(e) => {
                let mut wire = self.lock_wire();
                wire.transport = None;
                wire.link_state = match e {
                    VicpError::InitConnTimeout => LinkState::Down,
                    _ => LinkState::Unsupported,
                };
                wire.last_error = Some(e.code());
                warn!("{}: init failed: {e}", self.ip);
                Err(e)
            }
        }
    }

    fn connect_and_handshake(&self) -> Result<(Transport, String, [bool; 9])> {
        let addr = (self.ip.as_str(), 1861u16)
            .to_socket_addrs()
            .map_err(VicpError::InitSocketError)?
            .next()
            .ok_or(VicpError::InitConnRefused)?;

        let mut transport = Transport::connect(addr, self.connect_timeout)?;

        Self::exchange(&mut transport, INIT_STRING, false, self.read_timeout)
            .map_err(|_| VicpError::InitInitscopeError)?;

        let tmpl = Self::exchange(&mut transport, "TMPL?", true, self.read_timeout)
            .map_err(|_| VicpError::InitRdtmplError)?;
        if !String::from_utf8_lossy(&tmpl).contains(TEMPLATE_TAG) {
            return Err(VicpError::InitTmplUnsupported);
        }

        let idn = Self::exchange(&mut transport, "*IDN?", true, self.read_timeout)
            .map_err(|_| VicpError::InitIdnError)?;
        let idn_text = String::from_utf8_lossy(&idn);
        let model = idn_text
            .find("LECROY")
            .map(|pos| idn_text[pos..].trim_end_matches(['\0', '\n', '\r']).to_string())
            .unwrap_or_else(|| idn_text.trim_end_matches(['\0', '\n', '\r']).to_string());

        let names: Vec<&str> = channel_table(self.channels).iter().map(|(n, _)| *n).collect();
        let probe = names
            .iter()
            .map(|n| format!("{n}:TRA?"))
            .collect::<Vec<_>>()
            .join(";");
        let status = Self::exchange(&mut transport, &probe, true, self.read_timeout)
            .map_err(|_| VicpError::InitChnlstatError)?;
        let status_text = String::from_utf8_lossy(&status);

        let mut enabled = [false; 9];
        for (token, name) in status_text.split(';').zip(names.iter()) {
            if let Some(idx) = channel_index(self.channels, name) {
                enabled[idx as usize] = token.contains("ON");
            }
        }

        Ok((transport, model, enabled))
    }

    /// Recover the link.
    ///
    /// `interval = None` performs at most one attempt, matching the
    /// original's `interval == -1` one-shot call. `interval = Some(_)`
    /// loops forever, re-attempting whenever the link is down, sleeping
    /// `interval` between attempts -- sleeping cooperatively, so
    /// [`Session::stop_supervisor`] wakes it immediately rather than
    /// waiting out the remainder of the interval.
    pub fn recover_link(&self, interval: Option<Duration>, timeout: Duration) -> Result<()> {
        if let Some(interval) = interval {
            if interval < timeout {
                return Err(VicpError::RecoverTooOften);
            }
        }

        loop {
            let needs_recovery = matches!(
                self.lock_wire().link_state,
                LinkState::Down | LinkState::Unsupported
            );
            if needs_recovery {
                let _ = self.init();
            }

            let Some(interval) = interval else {
                return Ok(());
            };
            if self.cooperative_sleep(interval) {
                return Ok(());
            }
        }
    }

    /// Sleeps for `dur` unless `stop_supervisor` is called first. Returns
    /// `true` if woken early by a stop request.
    fn cooperative_sleep(&self, dur: Duration) -> bool {
        let guard = self
            .stop_mutex
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (guard, _timed_out) = self
            .stop_cv
            .wait_timeout_while(guard, dur, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }

    /// Wakes any in-progress `cooperative_sleep` and causes subsequent
    /// calls to return immediately. Idempotent.
    pub fn stop_supervisor(&self) {
        let mut guard = self
            .stop_mutex
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = true;
        self.stop_cv.notify_all();
    }

    /// Read a waveform from `channel` into `out`, returning the number of
    /// samples written (`min(out.len(), wflen)`).
    pub fn read_waveform(&self, channel: u8, out: &mut [f32]) -> Result<usize> {
        let name = channel_name(self.channels, channel).ok_or(VicpError::ReadwfChnlnumError)?;

        let payload = {
            let mut wire = self.lock_wire();
            if !wire.channel_enabled[channel as usize] {
                return Err(VicpError::ReadwfChnlDisabled);
            }
            self.operate_wire(&mut wire, &format!("{name}:WF?"), true)
                .map_err(|_| VicpError::ReadwfFailed)?
        };

        let (desc, n) =
            wavedesc::decode_waveform(&payload, out).map_err(|_| VicpError::ReadwfFailed)?;
        self.lock_descriptors().channel_desc[channel as usize] = Some(desc);
        Ok(n)
    }

    /// Format the cached trigger timestamp for `channel` as
    /// `MM/DD/YYYY,HH:MM:SS.ssssssssss`.
    pub fn get_last_trigger_time(&self, channel: u8) -> Result<String> {
        channel_name(self.channels, channel).ok_or(VicpError::LastTrgTimeChnlnumError)?;

        let desc = self.lock_descriptors();
        let wavedesc = desc.channel_desc[channel as usize]
            .as_ref()
            .ok_or(VicpError::NeverTriggered)?;
        let tt = wavedesc.trigger_time;
        if tt.months == 0 {
            return Err(VicpError::NeverTriggered);
        }

        let whole_seconds = tt.seconds.trunc().max(0.0) as u32;
        let frac = (tt.seconds - whole_seconds as f64).clamp(0.0, 1.0);
        Ok(format!(
            "{:02}/{:02}/{:04},{:02}:{:02}:{:02}.{:010}",
            tt.months,
            tt.days,
            tt.year,
            tt.hours,
            tt.minutes,
            whole_seconds,
            (frac * 1e10).round() as u64
        ))
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_name_lookup_respects_channel_count() {
        assert_eq!(channel_name(2, 3), None);
        assert_eq!(channel_name(4, 3), Some("C3"));
        assert_eq!(channel_name(2, 5), Some("TA"));
        assert_eq!(channel_name(2, 9), None);
    }

    #[test]
    fn operate_fails_fast_when_not_ready() {
        let session = Session::new(SessionConfig {
            ip: "127.0.0.1".into(),
            ..SessionConfig::default()
        });
        let err = session.operate("TDIV?", true).unwrap_err();
        assert!(matches!(err, VicpError::NotReady));
    }

    #[test]
    #[should_panic(expected = "empty command")]
    fn operate_panics_on_empty_command() {
        let session = Session::new(SessionConfig {
            ip: "127.0.0.1".into(),
            ..SessionConfig::default()
        });
        let _ = session.operate("", true);
    }

    #[test]
    fn recover_link_rejects_interval_smaller_than_timeout() {
        let session = Session::new(SessionConfig {
            ip: "127.0.0.1".into(),
            ..SessionConfig::default()
        });
        let err = session
            .recover_link(Some(Duration::from_secs(1)), Duration::from_secs(2))
            .unwrap_err();
        assert!(matches!(err, VicpError::RecoverTooOften));
    }

    #[test]
    fn stop_supervisor_wakes_cooperative_sleep_immediately() {
        let session = Session::new(SessionConfig {
            ip: "127.0.0.1".into(),
            ..SessionConfig::default()
        });
        let session = std::sync::Arc::new(session);
        let s2 = session.clone();
        let handle = std::thread::spawn(move || s2.cooperative_sleep(Duration::from_secs(30)));
        std::thread::sleep(Duration::from_millis(50));
        session.stop_supervisor();
        let stopped = handle.join().unwrap();
        assert!(stopped);
    }
}
