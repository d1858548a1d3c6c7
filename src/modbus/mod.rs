//! MODBUS/TCP acquisition engine: framing client, register-plan builder,
//! numeric decoder and the per-device worker that ties them together.

mod client;
mod decode;
mod plan;
mod worker;

pub use client::ModbusClient;
pub use decode::decode;
pub use plan::{build_plan, PlanItem, ReadRange};
pub use worker::run_modbus_worker;
