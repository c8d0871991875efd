//! Command layer: the Ioctl dispatch table mapping opcodes to ASCII SCPI
//! strings and parsing their scalar readbacks.

use crate::error::{Result, VicpError};
use crate::session::{channel_name, Session, Wire};

/// One entry of the 14-row memory-size table: the command to set it, the
/// response prefix it's recognised by, and its value in samples.
struct MsizEntry {
    cmd: &'static str,
    prefix: &'static str,
    value: u64,
}

const MSIZ_TABLE: [MsizEntry; 14] = [
    MsizEntry { cmd: "MSIZ 500", prefix: "500", value: 500 },
    MsizEntry { cmd: "MSIZ 1000", prefix: "1000", value: 1_000 },
    MsizEntry { cmd: "MSIZ 2500", prefix: "2500", value: 2_500 },
    MsizEntry { cmd: "MSIZ 5000", prefix: "5000", value: 5_000 },
    MsizEntry { cmd: "MSIZ 10K", prefix: "10K", value: 10_000 },
    MsizEntry { cmd: "MSIZ 25K", prefix: "25K", value: 25_000 },
    MsizEntry { cmd: "MSIZ 50K", prefix: "50K", value: 50_000 },
    MsizEntry { cmd: "MSIZ 100K", prefix: "100K", value: 100_000 },
    MsizEntry { cmd: "MSIZ 250K", prefix: "250K", value: 250_000 },
    MsizEntry { cmd: "MSIZ 500K", prefix: "500K", value: 500_000 },
    MsizEntry { cmd: "MSIZ 1M", prefix: "1M", value: 1_000_000 },
    MsizEntry { cmd: "MSIZ 2.5M", prefix: "2.5M", value: 2_500_000 },
    MsizEntry { cmd: "MSIZ 5M", prefix: "5M", value: 5_000_000 },
    MsizEntry { cmd: "MSIZ 10M", prefix: "10M", value: 10_000_000 },
];

const TRGMODE_TABLE: [&str; 4] = ["AUTO", "NORM", "SINGLE", "STOP"];

/// Ioctl opcode, one per row of the command table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// `*RST`; also resets the channel-enabled cache.
    Reset,
    /// `<Cn>:TRA ON`.
    EnableChan,
    /// `<Cn>:TRA OFF`.
    DisableChan,
    /// `<Cn>:TRA?`.
    GetChanStat,
    /// Set memory depth from the 14-row table.
    SetMemSize,
    /// `MSIZ?`.
    GetMemSize,
    /// `TDIV %eS`.
    SetTimeDiv,
    /// `TDIV?`.
    GetTimeDiv,
    /// `C<n>:VDIV %eV`, channels 1-4 only.
    SetVoltDiv,
    /// `C<n>:VDIV?`, channels 1-4 only.
    GetVoltDiv,
    /// Set trigger mode from the 4-row table.
    SetTrgMode,
    /// `TRMD?`.
    GetTrgMode,
    /// `TRSE EDGE,SR,<EX or Cn>,HT,OFF`.
    SetTrgSrc,
    /// `TRSE?`.
    GetTrgSrc,
    /// `*RCL <n>`, panel setup slots 0-4.
    LdPnlStp,
    /// `*SAV <n>`, panel setup slots 1-4.
    SvPnlStp,
    /// `ACAL ON`.
    EnableAcal,
    /// `ACAL OFF`.
    DisableAcal,
    /// `ACAL?`.
    GetAcalStat,
}

/// Argument carried by an [`Opcode`] that needs one.
#[derive(Debug, Clone, Copy)]
pub enum IoctlArg {
    None,
    /// A table index (memory-size row, trigger-mode row, trigger-source
    /// channel number, panel-setup slot).
    Index(u8),
    /// A scalar value (timebase, vertical scale).
    Float(f64),
}

/// Decoded result of an [`Opcode`].
#[derive(Debug, Clone, PartialEq)]
pub enum IoctlReply {
    /// No readback (a set-only opcode).
    None,
    /// An enabled/disabled or on/off readback.
    Bool(bool),
    /// A scalar readback (timebase, vertical scale, memory depth).
    Float(f64),
    /// A table-row readback (trigger mode, trigger source).
    Index(u8),
}

fn parse_scalar(payload: &[u8]) -> Result<f64> {
    String::from_utf8_lossy(payload)
        .trim()
        .trim_end_matches('\0')
        .parse()
        .map_err(|_| VicpError::ResponseProtocolError)
}

impl Session {
    /// Dispatch one Ioctl opcode. `channel` is ignored for global
    /// operations; for per-channel operations, channel 0 is always
    /// rejected, and (except for `EnableChan`/`GetChanStat`) a cached
    /// disabled channel is rejected before any command is sent.
    pub fn ioctl(&self, op: Opcode, channel: u8, arg: IoctlArg) -> Result<IoctlReply> {
        match op {
            Opcode::Reset => self.op_reset(),
            Opcode::EnableChan => self.op_enable_chan(channel),
            Opcode::DisableChan => self.op_disable_chan(channel),
            Opcode::GetChanStat => self.op_get_chan_stat(channel),
            Opcode::SetMemSize => self.op_set_memsize(arg),
            Opcode::GetMemSize => self.op_get_memsize(),
            Opcode::SetTimeDiv => self.op_set_timediv(arg),
            Opcode::GetTimeDiv => self.op_get_timediv(),
            Opcode::SetVoltDiv => self.op_set_voltdiv(channel, arg),
            Opcode::GetVoltDiv => self.op_get_voltdiv(channel),
            Opcode::SetTrgMode => self.op_set_trgmode(arg),
            Opcode::GetTrgMode => self.op_get_trgmode(),
            Opcode::SetTrgSrc => self.op_set_trgsrc(arg),
            Opcode::GetTrgSrc => self.op_get_trgsrc(),
            Opcode::LdPnlStp => self.op_ld_pnlstp(arg),
            Opcode::SvPnlStp => self.op_sv_pnlstp(arg),
            Opcode::EnableAcal => self.op_acal(true),
            Opcode::DisableAcal => self.op_acal(false),
            Opcode::GetAcalStat => self.op_get_acalstat(),
        }
    }

    /// Resolve and validate a channel argument against the enabled cache
    /// held in `wire`. `require_enabled` is false only for
    /// `EnableChan`/`GetChanStat`, which are themselves how the enabled
    /// cache gets populated; every other per-channel opcode, including
    /// `DisableChan`, is rejected if the channel is already cached as
    /// disabled.
    fn check_channel(&self, wire: &Wire, channel: u8, require_enabled: bool) -> Result<&'static str> {
        if channel == 0 {
            return Err(VicpError::IoctlMisuseChnlZero);
        }
        let name = channel_name(self.channels(), channel).ok_or(VicpError::IoctlChnlnumError)?;
        if require_enabled && !wire.channel_enabled[channel as usize] {
            return Err(VicpError::IoctlChnlDisabled);
        }
        Ok(name)
    }

    /// `SETVOLTDIV`/`GETVOLTDIV` only apply to the four signal channels,
    /// never the math traces.
    fn check_signal_channel(&self, wire: &Wire, channel: u8) -> Result<&'static str> {
        let name = self.check_channel(wire, channel, true)?;
        if !name.starts_with('C') {
            return Err(VicpError::IoctlWrongVdivChnl);
        }
        Ok(name)
    }

    fn op_reset(&self) -> Result<IoctlReply> {
        let mut wire = self.lock_wire();
        self.operate_wire(&mut wire, "*RST", false)?;
        wire.channel_enabled = [false; 9];
        wire.channel_enabled[1] = true;
        wire.channel_enabled[2] = true;
        Ok(IoctlReply::None)
    }

    fn op_enable_chan(&self, channel: u8) -> Result<IoctlReply> {
        let mut wire = self.lock_wire();
        let name = self.check_channel(&wire, channel, false)?;
        self.operate_wire(&mut wire, &format!("{name}:TRA ON"), false)?;
        wire.channel_enabled[channel as usize] = true;
        Ok(IoctlReply::Bool(true))
    }

    fn op_disable_chan(&self, channel: u8) -> Result<IoctlReply> {
        let mut wire = self.lock_wire();
        let name = self.check_channel(&wire, channel, true)?;
        self.operate_wire(&mut wire, &format!("{name}:TRA OFF"), false)?;
        wire.channel_enabled[channel as usize] = false;
        Ok(IoctlReply::Bool(false))
    }

    fn op_get_chan_stat(&self, channel: u8) -> Result<IoctlReply> {
        let mut wire = self.lock_wire();
        let name = self.check_channel(&wire, channel, false)?;
        let resp = self.operate_wire(&mut wire, &format!("{name}:TRA?"), true)?;
        let on = String::from_utf8_lossy(&resp).contains("ON");
        wire.channel_enabled[channel as usize] = on;
        Ok(IoctlReply::Bool(on))
    }

    fn op_set_memsize(&self, arg: IoctlArg) -> Result<IoctlReply> {
        let IoctlArg::Index(i) = arg else {
            return Err(VicpError::IoctlWrongMsiz);
        };
        let entry = MSIZ_TABLE.get(i as usize).ok_or(VicpError::IoctlWrongMsiz)?;
        self.operate(entry.cmd, false)?;
        Ok(IoctlReply::None)
    }

    fn op_get_memsize(&self) -> Result<IoctlReply> {
        let resp = self.operate("MSIZ?", true)?;
        let text = String::from_utf8_lossy(&resp);
        let text = text.trim();
        for entry in &MSIZ_TABLE {
            if text.starts_with(entry.prefix) {
                return Ok(IoctlReply::Float(entry.value as f64));
            }
        }
        // Firmware reported a value the table doesn't recognise (e.g. a
        // custom sequence-mode depth); fall back to a raw numeric parse.
        Ok(IoctlReply::Float(parse_scalar(&resp)?))
    }

    fn op_set_timediv(&self, arg: IoctlArg) -> Result<IoctlReply> {
        let IoctlArg::Float(v) = arg else {
            return Err(VicpError::ResponseProtocolError);
        };
        self.operate(&format!("TDIV {v:.6E}S"), false)?;
        Ok(IoctlReply::None)
    }

    fn op_get_timediv(&self) -> Result<IoctlReply> {
        let resp = self.operate("TDIV?", true)?;
        Ok(IoctlReply::Float(parse_scalar(&resp)?))
    }

    fn op_set_voltdiv(&self, channel: u8, arg: IoctlArg) -> Result<IoctlReply> {
        let IoctlArg::Float(v) = arg else {
            return Err(VicpError::ResponseProtocolError);
        };
        let mut wire = self.lock_wire();
        let name = self.check_signal_channel(&wire, channel)?;
        self.operate_wire(&mut wire, &format!("{name}:VDIV {v:.6E}V"), false)?;
        Ok(IoctlReply::None)
    }

    fn op_get_voltdiv(&self, channel: u8) -> Result<IoctlReply> {
        let mut wire = self.lock_wire();
        let name = self.check_signal_channel(&wire, channel)?;
        let resp = self.operate_wire(&mut wire, &format!("{name}:VDIV?"), true)?;
        Ok(IoctlReply::Float(parse_scalar(&resp)?))
    }

    fn op_set_trgmode(&self, arg: IoctlArg) -> Result<IoctlReply> {
        let IoctlArg::Index(i) = arg else {
            return Err(VicpError::IoctlWrongTrigMode);
        };
        let mode = TRGMODE_TABLE.get(i as usize).ok_or(VicpError::IoctlWrongTrigMode)?;
        self.operate(&format!("TRMD {mode}"), false)?;
        Ok(IoctlReply::None)
    }

    fn op_get_trgmode(&self) -> Result<IoctlReply> {
        let resp = self.operate("TRMD?", true)?;
        let text = String::from_utf8_lossy(&resp);
        let text = text.trim();
        let idx = TRGMODE_TABLE
            .iter()
            .position(|m| text.contains(m))
            .ok_or(VicpError::IoctlWrongTrigMode)?;
        Ok(IoctlReply::Index(idx as u8))
    }

    fn op_set_trgsrc(&self, arg: IoctlArg) -> Result<IoctlReply> {
        let IoctlArg::Index(i) = arg else {
            return Err(VicpError::IoctlWrongTrigSrc);
        };
        let src = if i == 0 {
            "EX".to_string()
        } else {
            let name = channel_name(self.channels(), i).ok_or(VicpError::IoctlWrongTrigSrc)?;
            if !name.starts_with('C') {
                return Err(VicpError::IoctlWrongTrigSrc);
            }
            name.to_string()
        };
        self.operate(&format!("TRSE EDGE,SR,{src},HT,OFF"), false)?;
        Ok(IoctlReply::None)
    }

    /// `TRSE?` is tokenised on `,` and scanned for the `SR,<value>` pair
    /// rather than indexed by fixed byte offset, so a firmware revision
    /// that reorders or pads the response doesn't silently misparse.
    fn op_get_trgsrc(&self) -> Result<IoctlReply> {
        let resp = self.operate("TRSE?", true)?;
        let text = String::from_utf8_lossy(&resp);
        let tokens: Vec<&str> = text.split(',').map(str::trim).collect();
        let sr_pos = tokens
            .iter()
            .position(|t| *t == "SR")
            .ok_or(VicpError::IoctlWrongTrigSrc)?;
        let value = tokens.get(sr_pos + 1).ok_or(VicpError::IoctlWrongTrigSrc)?;
        if value.starts_with("EX") {
            return Ok(IoctlReply::Index(0));
        }
        value
            .trim_start_matches('C')
            .trim_end_matches(['\0', '\n', '\r'])
            .parse::<u8>()
            .map(IoctlReply::Index)
            .map_err(|_| VicpError::IoctlWrongTrigSrc)
    }

    fn op_ld_pnlstp(&self, arg: IoctlArg) -> Result<IoctlReply> {
        let IoctlArg::Index(i) = arg else {
            return Err(VicpError::IoctlWrongNvmemIndex);
        };
        if i > 4 {
            return Err(VicpError::IoctlWrongNvmemIndex);
        }
        self.operate(&format!("*RCL {i}"), false)?;
        Ok(IoctlReply::None)
    }

    fn op_sv_pnlstp(&self, arg: IoctlArg) -> Result<IoctlReply> {
        let IoctlArg::Index(i) = arg else {
            return Err(VicpError::IoctlWrongNvmemIndex);
        };
        if i == 0 || i > 4 {
            return Err(VicpError::IoctlWrongNvmemIndex);
        }
        self.operate(&format!("*SAV {i}"), false)?;
        Ok(IoctlReply::None)
    }

    fn op_acal(&self, enable: bool) -> Result<IoctlReply> {
        let word = if enable { "ON" } else { "OFF" };
        self.operate(&format!("ACAL {word}"), false)?;
        Ok(IoctlReply::None)
    }

    fn op_get_acalstat(&self) -> Result<IoctlReply> {
        let resp = self.operate("ACAL?", true)?;
        Ok(IoctlReply::Bool(String::from_utf8_lossy(&resp).contains("ON")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memsize_table_prefixes_are_unique_and_ordered() {
        for w in MSIZ_TABLE.windows(2) {
            assert!(w[0].value < w[1].value);
        }
    }

    #[test]
    fn parse_scalar_accepts_scientific_notation() {
        assert_eq!(parse_scalar(b"1.0E-3\n\0").unwrap(), 0.001);
    }

    #[test]
    fn parse_scalar_rejects_garbage() {
        assert!(parse_scalar(b"not-a-number").is_err());
    }
}
