#![cfg_attr(not(any(test, feature = "std")), no_std)]
//! CCS811 air quality node.
//!
//! A battery powered node that wakes from deep sleep, reads a CCS811 gas sensor and a
//! humidity/temperature sensor, updates an e-paper display and goes back to sleep. This crate
//! holds the parts that decide what happens on each wake:
//!
//! * [`ccs811`], a register level driver for the CCS811, and [`bootloader`] for replacing its
//!   application firmware.
//! * [`wake_state`], the few bytes of retained memory that say where the sensor stands in its
//!   conditioning and calibration.
//! * [`baseline`], durable storage for the sensor's calibration baseline.
//! * [`node`], the wake cycle itself, talking to the rest of the board through [`ports`].
//!
//! Board support code builds a [`node::Board`] after every wake and runs one cycle:
//!
//! ```ignore
//! use ccs811_node::config::NodeConfig;
//! use ccs811_node::node::{Board, Node};
//!
//! let board = Board {
//!     i2c,                        // embedded_hal::i2c::I2c
//!     environment: bme280,        // ports::EnvironmentSensor
//!     display: epaper,            // ports::DisplaySink
//!     battery: battery_adc,       // ports::BatterySampler
//!     store: baseline_file,       // baseline::BaselineStore
//!     retained: rtc_memory,       // ports::RetainedMemory
//!     trigger: capture_button,    // embedded_hal::digital::InputPin, active low
//!     indicator: status_led,      // embedded_hal::digital::OutputPin
//!     delay,                      // embedded_hal::delay::DelayNs
//! };
//! let node = Node::new(NodeConfig::default(), board);
//! // Doesn't return on hardware.
//! let _ = node.wake_and_sleep(&mut deep_sleep);
//! ```
//!
//! The CCS811 needs 20 minutes of running before its readings are accurate, and it can take a
//! previously saved baseline to skip days of re-calibration. Both survive deep sleep only through
//! the retained state and the stored baseline:
//!
//! ```text
//!            Power on (retained memory empty)
//!                        │
//!                        ▼
//!     FirstRun: start sensor, runs = 20, no gas values
//!                        │
//!                        ▼
//!    Conditioning: runs - 1, no gas values  ◄──┐
//!                        │                     │
//!                        ▼                     │
//!                   runs == 0 ──► No ──────────┘
//!                        │
//!                        ▼
//!                       Yes
//!                        │
//!                        ▼
//!       Stored baseline? ──► No ──► live values, ask again next wake
//!                        │
//!                        ▼
//!                       Yes
//!                        │
//!                        ▼
//!    Load it into the sensor, no gas values this wake
//!                        │
//!                        ▼
//!    ConditionedBaselineLoaded: live values  ◄─┐
//!                        │                     │
//!                        └─────────────────────┘
//! ```
//!
//! Once conditioned, holding the capture button during a wake saves the sensor's current
//! baseline, overwriting the stored one.
//!
//! ## Features
//!
//! - `use-defmt` (default): log through `defmt`.
//! - `std`: enables [`baseline::FileBaselineStore`].

mod fmt;

pub mod baseline;
pub mod bootloader;
pub mod ccs811;
pub mod config;
pub mod node;
pub mod ports;
pub mod wake_state;

pub use ccs811::{Ccs811, DriveMode, GasReading, SENSOR_ADDRESS};
pub use config::NodeConfig;
pub use node::{Board, CycleError, CycleReport, Node, Phase};
pub use wake_state::WakeCycleState;
