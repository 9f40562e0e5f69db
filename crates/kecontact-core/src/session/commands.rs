// ── High-level station commands ──
//
// Thin layer over `send_command`: capability gating against the station
// model, then the protocol crate builds and validates the wire string.
// Everything here is fire-and-forget — the station's TCH-OK/TCH-ERR
// answer is observed by ingestion and logged, never returned.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use kecontact_proto::command::DEFAULT_RFID_CLASS;
use kecontact_proto::report::field;
use kecontact_proto::DeviceCommand;

use crate::error::CoreError;
use crate::model::Capability;

use super::ChargingStation;

/// How long `set_charging_power` waits for a charging process to start
/// after enabling the station.
const CHARGING_START_DEADLINE: Duration = Duration::from_secs(10);

/// A running phase draws at least this much power (watts).
const MIN_PHASE_POWER_W: f64 = 2.0;

impl ChargingStation {
    /// Start a charging process.
    pub async fn enable(&self) -> Result<(), CoreError> {
        self.set_enabled(true).await
    }

    /// Stop a charging process.
    pub async fn disable(&self) -> Result<(), CoreError> {
        self.set_enabled(false).await
    }

    pub async fn set_enabled(&self, on: bool) -> Result<(), CoreError> {
        self.send_command(DeviceCommand::Enable(on)).await
    }

    /// Activate failsafe mode: fall back to `fallback_amps` when no
    /// command arrives for `timeout_s` seconds.
    pub async fn set_failsafe(
        &self,
        timeout_s: u32,
        fallback_amps: f64,
        persist: bool,
    ) -> Result<(), CoreError> {
        self.send_command(DeviceCommand::Failsafe {
            timeout_s,
            fallback_amps,
            persist,
        })
        .await
    }

    pub async fn disable_failsafe(&self, persist: bool) -> Result<(), CoreError> {
        self.send_command(DeviceCommand::FailsafeOff { persist })
            .await
    }

    /// Permanent current limit in amps. 0 stops charging like `disable`.
    pub async fn set_current_permanent(&self, amps: f64) -> Result<(), CoreError> {
        self.send_command(DeviceCommand::CurrentPermanent { amps })
            .await
    }

    /// Current limit applied after `delay_s` seconds. The P20 firmware
    /// has no delayed variant; the delay is dropped there.
    pub async fn set_current(&self, amps: f64, delay_s: u32) -> Result<(), CoreError> {
        if self.identity().model == crate::model::DeviceModel::KebaP20 {
            warn!("P20 does not support delayed current limits, applying immediately");
            return self.set_current_permanent(amps).await;
        }
        self.send_command(DeviceCommand::CurrentDelayed { amps, delay_s })
            .await
    }

    /// Energy limit for the running session in kWh. 0 deactivates.
    pub async fn set_energy(&self, kwh: f64) -> Result<(), CoreError> {
        self.identity().require("set_energy", Capability::SetEnergy)?;
        self.send_command(DeviceCommand::EnergyLimit { kwh }).await
    }

    /// Set the X1 output: 0, 1, or a pulse rate in pulses/kWh.
    pub async fn set_output(&self, value: u16) -> Result<(), CoreError> {
        self.identity().require("set_output", Capability::SetOutput)?;
        self.send_command(DeviceCommand::Output { value }).await
    }

    /// Authorize a charging process with an RFID tag. Enables the
    /// station first, as the firmware expects.
    pub async fn start(
        &self,
        rfid: Option<&str>,
        rfid_class: Option<&str>,
    ) -> Result<(), CoreError> {
        self.identity().require("start", Capability::Start)?;
        self.set_enabled(true).await?;
        self.send_command(DeviceCommand::Start {
            rfid: rfid.map(str::to_owned),
            rfid_class: rfid_class.unwrap_or(DEFAULT_RFID_CLASS).to_owned(),
        })
        .await
    }

    /// Deauthorize a charging process.
    pub async fn stop(&self, rfid: Option<&str>) -> Result<(), CoreError> {
        self.identity().require("stop", Capability::Stop)?;
        self.send_command(DeviceCommand::Stop {
            rfid: rfid.map(str::to_owned),
        })
        .await
    }

    /// Show text on the station display for `min_time_s`..`max_time_s`.
    pub async fn display(
        &self,
        text: &str,
        min_time_s: u16,
        max_time_s: u16,
    ) -> Result<(), CoreError> {
        self.identity().require("display", Capability::Display)?;
        self.send_command(DeviceCommand::Display {
            text: text.to_owned(),
            min_time_s,
            max_time_s,
        })
        .await
    }

    /// Unlock the socket. Charging must be disabled first.
    pub async fn unlock_socket(&self) -> Result<(), CoreError> {
        self.send_command(DeviceCommand::Unlock).await
    }

    /// Select the control source for X2 phase switching (0-4).
    pub async fn x2_source(&self, source: u8) -> Result<(), CoreError> {
        self.require_phase_switch("x2_source")?;
        self.send_command(DeviceCommand::PhaseSource { source })
            .await
    }

    /// Toggle the X2 output between one and three phases.
    pub async fn x2(&self, three_phases: bool) -> Result<(), CoreError> {
        self.require_phase_switch("x2")?;
        self.send_command(DeviceCommand::Phases { three_phases })
            .await
    }

    /// Set a charging power target in kW by adjusting the current limit
    /// to the live phase measurements.
    ///
    /// Needs an authorized charging process; if charging is merely
    /// stopped, the station is enabled and given
    /// [`CHARGING_START_DEADLINE`] to come up. Soft preconditions that
    /// are not met return `Ok(false)`; validation failures are errors.
    pub async fn set_charging_power(
        &self,
        power_kw: f64,
        round_up: bool,
        stop_below_6_a: bool,
    ) -> Result<bool, CoreError> {
        let identity = self.identity();
        if !identity.is_meter_integrated() {
            return Err(CoreError::Unsupported {
                operation: "set_charging_power",
                model: identity.model_name.clone(),
            });
        }
        if !power_kw.is_finite() || !(0.0..=44.0).contains(&power_kw) {
            return Err(CoreError::Validation {
                message: "power must be between 0 and 44 kW".into(),
            });
        }

        if self.number_value(field::AUTHREQ) == Some(1.0) {
            warn!("charging process is not authorized, authorize first");
            return Ok(false);
        }

        if !Self::is_charging(&self.data()) {
            info!("charging process authorized but stopped, enabling");
            let mut updates = self.subscribe();
            self.set_enabled(true).await?;
            let started = tokio::time::timeout(
                CHARGING_START_DEADLINE,
                updates.wait_for(|data| Self::is_charging(data)),
            )
            .await;
            if !matches!(started, Ok(Ok(_))) {
                warn!(
                    deadline_secs = CHARGING_START_DEADLINE.as_secs(),
                    "charging process did not start in time, aborting"
                );
                return Ok(false);
            }
        }

        // Identify the active phases and their average voltage from the
        // latest metering report.
        let mut phases = 0u32;
        let mut voltage_sum = 0.0;
        for (current_key, voltage_key) in
            [(field::I1, field::U1), (field::I2, field::U2), (field::I3, field::U3)]
        {
            let (Some(current), Some(voltage)) = (
                self.number_value(current_key),
                self.number_value(voltage_key),
            ) else {
                warn!("unable to identify the number of charging phases");
                return Ok(false);
            };
            if current * voltage > MIN_PHASE_POWER_W {
                phases += 1;
                voltage_sum += voltage;
            }
        }
        if phases == 0 {
            warn!("no charging process running");
            return Ok(false);
        }
        let avg_voltage = voltage_sum / f64::from(phases);
        debug!(phases, avg_voltage, "phase measurements");

        let raw_amps = (power_kw * 1000.0) / avg_voltage / f64::from(phases);
        // Round down by default so the target power is never overshot.
        let amps = if round_up {
            raw_amps.ceil()
        } else {
            raw_amps.floor()
        };

        if amps == 0.0 {
            self.set_enabled(false).await?;
        } else if amps < 6.0 {
            if stop_below_6_a {
                self.set_enabled(false).await?;
            } else {
                self.set_current(6.0, 1).await?;
            }
        } else if amps < 63.0 {
            self.set_current(amps, 1).await?;
        } else {
            warn!(amps, "calculated current is implausibly high, aborting");
            return Ok(false);
        }

        Ok(true)
    }

    fn require_phase_switch(&self, operation: &'static str) -> Result<(), CoreError> {
        let identity = self.identity();
        if identity.has_phase_switch_x2() {
            Ok(())
        } else {
            Err(CoreError::Unsupported {
                operation,
                model: identity.model_name.clone(),
            })
        }
    }

    /// Numeric view of a data-store value.
    fn number_value(&self, key: &str) -> Option<f64> {
        self.get_value(key).as_ref().and_then(Value::as_f64)
    }
}
