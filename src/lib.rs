#![warn(missing_docs)]
/*! A client library for controlling LeCroy digital storage oscilloscopes
over Ethernet, using the vendor's VICP (Versatile Instrument Control
Protocol) framing on TCP port 1861.

It is meant to be embedded inside a control-system I/O layer that opens
one [`Session`] per instrument and calls into it from a single worker
thread per session, with an optional background [`supervisor::Supervisor`]
retrying the connection whenever the link drops.

# Example

```no_run
use lecroy_vicp::{IdentityField, Session, SessionConfig};

let session = Session::new(SessionConfig {
    ip: "192.168.1.50".into(),
    channels: 4,
    ..SessionConfig::default()
});
session.init()?;
let model = session.get_identity_field(IdentityField::Model)?;
println!("connected to {model}");
# Ok::<(), lecroy_vicp::VicpError>(())
```

# Architecture

Four layers, leaves first: the [`frame`] codec, the blocking [`transport`],
the [`Session`] that owns the socket and its locks, and the [`commands`]
dispatch table built on top of `Session::operate`. The [`wavedesc`] module
parses the binary descriptor that precedes a waveform's sample array.

## Links

* VICP protocol reference: LeCroy/Teledyne "Remote Control Manual"
*/

pub mod commands;
pub mod error;
pub mod frame;
pub mod session;
pub mod supervisor;
pub mod transport;
pub mod wavedesc;

pub use commands::{IoctlArg, IoctlReply, Opcode};
pub use error::{ErrorCode, Result, VicpError};
pub use session::{IdentityField, LinkState, Session, SessionConfig, SupervisorPriority};
pub use supervisor::Supervisor;
pub use transport::Transport;
pub use wavedesc::{SampleFormat, TriggerTime, WaveDesc};
