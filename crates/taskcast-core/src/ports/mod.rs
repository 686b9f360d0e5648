//! Ports - 抽象化レイヤー
//!
//! 外部の関心事（時刻、ID 生成、料金表）を trait として切り出し、
//! テストでは差し替えられるようにする。

pub mod clock;
pub mod id_generator;
pub mod pricing;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::pricing::{PricingTable, StaticPricing};
