// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Firehose nozzle: reads platform envelopes, turns the metric-bearing ones
//! into deduplicated metric events and forwards logs, each through its own
//! filter.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod buffer;
pub mod config;
pub mod constants;
pub mod counter_tracker;
pub mod envelope;
pub mod errors;
pub mod filter;
pub mod http_metrics;
pub mod labels;
pub mod metric;
pub mod nozzle;
pub mod router;
pub mod sink;
pub mod telemetry;
pub mod translate;
pub mod units;

#[cfg(test)]
mod test_support;
