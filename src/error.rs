//! Error taxonomy for the VICP client.
//!
//! Every variant traces back to one of the `LECROY_ERR_*` codes in the
//! original driver, so a host that logged the original numeric code can
//! still find the matching message here via [`VicpError::code`].

/// Distinct, monotonically-numbered error codes, matching the original
/// driver's `LECROY_ERR_*` table so host-side logging keeps the same
/// numbering across the rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    NoError = 0,
    SelectSocketTimeout = 1,
    ReadSocketError = 2,
    WriteCommandError = 3,
    ResponseProtocolError = 4,
    ResponseAllocError = 5,
    ResponseDeadloop = 6,
    InitSocketError = 7,
    InitConnRefused = 8,
    InitConnTimeout = 9,
    InitInitscopeError = 10,
    InitRdtmplError = 11,
    InitTmplUnsupported = 12,
    InitIdnError = 13,
    InitChnlstatError = 14,
    OpenMontaskError = 15,
    RecoverTooOften = 16,
    ReadwfChnlnumError = 17,
    ReadwfChnlDisabled = 18,
    ReadwfFailed = 19,
    IoctlChnlnumError = 20,
    IoctlChnlDisabled = 21,
    IoctlWrongMsiz = 22,
    IoctlWrongVdivChnl = 23,
    IoctlWrongTrigMode = 24,
    IoctlWrongTrigSrc = 25,
    IoctlWrongNvmemIndex = 26,
    IoctlUnsupportedCmd = 27,
    IoctlMisuseChnlZero = 28,
    LastTrgTimeChnlnumError = 29,
}

/// Errors that can be returned by any operation in this crate.
#[derive(Debug, thiserror::Error)]
pub enum VicpError {
    /// `select()`/`poll()` on the socket timed out while waiting for data.
    #[error("select socket timeout, link down, either timeout or something wrong")]
    SelectSocketTimeout,

    /// A `read()` on the socket failed or returned zero before the wanted
    /// byte count was reached.
    #[error("read socket error, link down, either timeout or something wrong")]
    ReadSocketError(#[source] Option<std::io::Error>),

    /// A `write()` on the socket failed or wrote fewer bytes than the
    /// command required.
    #[error("write command error, link down or something wrong")]
    WriteCommandError(#[source] Option<std::io::Error>),

    /// A frame header did not match `(op & 0xFE) == 0x80, version == 0x01`.
    #[error("protocol error: expected 0x80/0x81, 0x1, ..., got something else")]
    ResponseProtocolError,

    /// The response buffer could not be grown.
    #[error("failed to allocate memory while assembling response")]
    ResponseAllocError,

    /// More than 1000 continuation frames were seen without an EOI frame.
    #[error("continuation frame dead loop, forcing link down")]
    ResponseDeadloop,

    /// `socket()` creation failed.
    #[error("failed to create socket")]
    InitSocketError(#[source] std::io::Error),

    /// The peer refused the TCP connection.
    #[error("connection refused by scope")]
    InitConnRefused,

    /// The connect deadline elapsed before the TCP handshake completed.
    #[error("connection to scope timed out")]
    InitConnTimeout,

    /// The `INIT_STRING` handshake command failed.
    #[error("failed to initialize scope")]
    InitInitscopeError,

    /// `TMPL?` failed (transport failure, not template mismatch).
    #[error("failed to read template from scope")]
    InitRdtmplError,

    /// `TMPL?` succeeded but the template is not `LECROY_2_3`.
    #[error("unsupported template reported by scope")]
    InitTmplUnsupported,

    /// `*IDN?` failed.
    #[error("failed to read identity from scope")]
    InitIdnError,

    /// The per-channel status probe (`Cn:TRA?;...`) failed.
    #[error("failed to read channel status from scope")]
    InitChnlstatError,

    /// The background link-supervisor thread could not be spawned.
    #[error("failed to spawn link monitor thread")]
    OpenMontaskError(#[source] std::io::Error),

    /// `recover_link` was called with `interval < timeout`.
    #[error("recover interval is smaller than timeout")]
    RecoverTooOften,

    /// Waveform read: the channel number is out of range for this scope.
    #[error("channel number out of range")]
    ReadwfChnlnumError,

    /// Waveform read: the channel's trace is not enabled.
    #[error("channel is disabled")]
    ReadwfChnlDisabled,

    /// Waveform read: the `Cn:WF?`/`Tx:WF?` command failed.
    #[error("failed to retrieve waveform")]
    ReadwfFailed,

    /// Ioctl: the channel number is out of range for this scope.
    #[error("channel number out of range")]
    IoctlChnlnumError,

    /// Ioctl: the targeted channel is disabled.
    #[error("channel is disabled")]
    IoctlChnlDisabled,

    /// `SETMEMSIZE` index is outside `0..14`.
    #[error("illegal memory size index")]
    IoctlWrongMsiz,

    /// `SETVOLTDIV`/`GETVOLTDIV` used on a non-signal (math trace) channel.
    #[error("vdiv command is only valid on channels C1-C4")]
    IoctlWrongVdivChnl,

    /// `SETTRGMODE` index is outside `0..4`.
    #[error("illegal trigger mode")]
    IoctlWrongTrigMode,

    /// `SETTRGSRC` index is out of range for this scope's channel count.
    #[error("illegal trigger source")]
    IoctlWrongTrigSrc,

    /// `LDPNLSTP`/`SVPNLSTP` index is out of range.
    #[error("illegal panel setup index")]
    IoctlWrongNvmemIndex,

    /// The command dispatch table has no entry for the requested opcode.
    #[error("unsupported ioctl opcode")]
    IoctlUnsupportedCmd,

    /// A channel-0 command was issued for an operation that requires a
    /// concrete channel.
    #[error("channel 0 may not be used for this operation")]
    IoctlMisuseChnlZero,

    /// `get_last_trigger_time`: channel number out of range.
    #[error("channel number out of range")]
    LastTrgTimeChnlnumError,

    /// `get_last_trigger_time`: the channel has never triggered (no
    /// waveform has been read on it yet).
    #[error("channel has never triggered")]
    NeverTriggered,

    /// The session is not in the OK state, so no command may be issued.
    #[error("session is not ready (link state is not OK)")]
    NotReady,
}

impl VicpError {
    /// The original driver's monotonic error number, for hosts that log by
    /// code rather than by message.
    pub fn code(&self) -> ErrorCode {
        use ErrorCode::*;
        match self {
            VicpError::SelectSocketTimeout => SelectSocketTimeout,
            VicpError::ReadSocketError(_) => ReadSocketError,
            VicpError::WriteCommandError(_) => WriteCommandError,
            VicpError::ResponseProtocolError => ResponseProtocolError,
            VicpError::ResponseAllocError => ResponseAllocError,
            VicpError::ResponseDeadloop => ResponseDeadloop,
            VicpError::InitSocketError(_) => InitSocketError,
            VicpError::InitConnRefused => InitConnRefused,
            VicpError::InitConnTimeout => InitConnTimeout,
            VicpError::InitInitscopeError => InitInitscopeError,
            VicpError::InitRdtmplError => InitRdtmplError,
            VicpError::InitTmplUnsupported => InitTmplUnsupported,
            VicpError::InitIdnError => InitIdnError,
            VicpError::InitChnlstatError => InitChnlstatError,
            VicpError::OpenMontaskError(_) => OpenMontaskError,
            VicpError::RecoverTooOften => RecoverTooOften,
            VicpError::ReadwfChnlnumError => ReadwfChnlnumError,
            VicpError::ReadwfChnlDisabled => ReadwfChnlDisabled,
            VicpError::ReadwfFailed => ReadwfFailed,
            VicpError::IoctlChnlnumError => IoctlChnlnumError,
            VicpError::IoctlChnlDisabled => IoctlChnlDisabled,
            VicpError::IoctlWrongMsiz => IoctlWrongMsiz,
            VicpError::IoctlWrongVdivChnl => IoctlWrongVdivChnl,
            VicpError::IoctlWrongTrigMode => IoctlWrongTrigMode,
            VicpError::IoctlWrongTrigSrc => IoctlWrongTrigSrc,
            VicpError::IoctlWrongNvmemIndex => IoctlWrongNvmemIndex,
            VicpError::IoctlUnsupportedCmd => IoctlUnsupportedCmd,
            VicpError::IoctlMisuseChnlZero => IoctlMisuseChnlZero,
            VicpError::LastTrgTimeChnlnumError => LastTrgTimeChnlnumError,
            // Neither of these two has a direct counterpart in the
            // original numbering; they didn't need one there because the
            // C driver signalled them by a bare ERROR return alongside
            // out-of-band state (linkstat) rather than a distinct code.
            VicpError::NeverTriggered => LastTrgTimeChnlnumError,
            VicpError::NotReady => ReadSocketError,
        }
    }

    /// True if this error classifies as a transport failure, meaning the
    /// caller's link has already transitioned to `LinkState::Down` or
    /// `LinkState::Unsupported` by the time this error is observed.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            VicpError::SelectSocketTimeout
                | VicpError::ReadSocketError(_)
                | VicpError::WriteCommandError(_)
                | VicpError::ResponseProtocolError
                | VicpError::ResponseAllocError
                | VicpError::ResponseDeadloop
                | VicpError::InitSocketError(_)
                | VicpError::InitConnRefused
                | VicpError::InitConnTimeout
        )
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, VicpError>;
