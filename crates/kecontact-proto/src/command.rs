// ── Command encoding ──
//
// One variant per operation the firmware understands. `encode` validates
// every parameter before building the wire string, so an out-of-range
// value never causes network traffic. The per-command pacing and
// fast-polling attributes live here too: they are properties of the
// protocol, not of any particular session.

use std::time::Duration;

use crate::error::ProtoError;

/// Default RFID class ("color") used when authorizing without one.
pub const DEFAULT_RFID_CLASS: &str = "01010400000000000000";

/// A command addressed to a single charging station.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    /// Request report `n` (1, 2, 3 or 100+).
    Report(u8),
    /// Activate failsafe mode: fall back to `fallback_amps` after
    /// `timeout_s` seconds without a command.
    Failsafe {
        timeout_s: u32,
        fallback_amps: f64,
        persist: bool,
    },
    /// Deactivate failsafe mode.
    FailsafeOff { persist: bool },
    /// Enable or disable the charging process.
    Enable(bool),
    /// Permanent current limit in amps (0 stops charging).
    CurrentPermanent { amps: f64 },
    /// Current limit applied after a delay in seconds.
    CurrentDelayed { amps: f64, delay_s: u32 },
    /// Energy limit for the running session in kWh (0 deactivates).
    EnergyLimit { kwh: f64 },
    /// Set the X1 output: 0, 1, or a pulse rate in pulses/kWh.
    Output { value: u16 },
    /// Authorize a charging process with an RFID tag.
    Start {
        rfid: Option<String>,
        rfid_class: String,
    },
    /// Deauthorize a charging process.
    Stop { rfid: Option<String> },
    /// Show text on the station display.
    Display {
        text: String,
        min_time_s: u16,
        max_time_s: u16,
    },
    /// Unlock the socket (charging must be disabled first).
    Unlock,
    /// Select the control source for X2 phase switching (0-4).
    PhaseSource { source: u8 },
    /// Toggle the X2 output between one and three phases.
    Phases { three_phases: bool },
}

impl DeviceCommand {
    /// Build the wire string, validating all parameters first.
    pub fn encode(&self) -> Result<String, ProtoError> {
        match self {
            Self::Report(n) => Ok(format!("report {n}")),

            Self::Failsafe {
                timeout_s,
                fallback_amps,
                persist,
            } => {
                if (*timeout_s < 10 && *timeout_s != 0) || *timeout_s > 600 {
                    return Err(ProtoError::validation(
                        "failsafe timeout must be between 10 and 600 seconds, or 0 to deactivate",
                    ));
                }
                validate_current(*fallback_amps)?;
                Ok(format!(
                    "failsafe {timeout_s} {} {}",
                    milliamps(*fallback_amps),
                    u8::from(*persist)
                ))
            }

            Self::FailsafeOff { persist } => Ok(format!("failsafe 0 0 {}", u8::from(*persist))),

            Self::Enable(on) => Ok(format!("ena {}", u8::from(*on))),

            Self::CurrentPermanent { amps } => {
                validate_current(*amps)?;
                Ok(format!("curr {}", milliamps(*amps)))
            }

            Self::CurrentDelayed { amps, delay_s } => {
                validate_current(*amps)?;
                if *delay_s >= 860_400 {
                    return Err(ProtoError::validation(
                        "delay must be between 0 and 860400 seconds",
                    ));
                }
                Ok(format!("currtime {} {delay_s}", milliamps(*amps)))
            }

            Self::EnergyLimit { kwh } => {
                if !kwh.is_finite() || (*kwh < 1.0 && *kwh != 0.0) || *kwh >= 10_000.0 {
                    return Err(ProtoError::validation(
                        "energy must be between 1 and 10000 kWh, or 0 to deactivate",
                    ));
                }
                #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
                let tenth_wh = (kwh * 10_000.0).round() as i64;
                Ok(format!("setenergy {tenth_wh}"))
            }

            Self::Output { value } => {
                if !matches!(value, 0 | 1 | 10..=150) {
                    return Err(ProtoError::validation(
                        "output must be 0, 1, or a pulse rate between 10 and 150 pulses/kWh",
                    ));
                }
                Ok(format!("output {value}"))
            }

            Self::Start { rfid, rfid_class } => match rfid {
                Some(tag) => {
                    validate_rfid_tag(tag)?;
                    validate_rfid_class(rfid_class)?;
                    Ok(format!("start {tag} {rfid_class}"))
                }
                None => Ok("start".into()),
            },

            Self::Stop { rfid } => match rfid {
                Some(tag) => {
                    validate_rfid_tag(tag)?;
                    Ok(format!("stop {tag}"))
                }
                None => Ok("stop".into()),
            },

            Self::Display {
                text,
                min_time_s,
                max_time_s,
            } => {
                // The firmware renders `$` as a space and accepts at most
                // 23 characters.
                let text: String = text.replace(' ', "$").chars().take(23).collect();
                Ok(format!("display 1 {min_time_s} {max_time_s} 0 {text}"))
            }

            Self::Unlock => Ok("unlock".into()),

            Self::PhaseSource { source } => {
                if *source > 4 {
                    return Err(ProtoError::validation(
                        "phase switch source must be between 0 and 4",
                    ));
                }
                Ok(format!("x2src {source}"))
            }

            Self::Phases { three_phases } => Ok(format!("x2 {}", u8::from(*three_phases))),
        }
    }

    /// Whether the command mutates station state and therefore warrants
    /// a temporary fast polling cadence to observe its effect.
    pub fn triggers_fast_poll(&self) -> bool {
        match self {
            Self::Failsafe { .. }
            | Self::FailsafeOff { .. }
            | Self::Enable(_)
            | Self::CurrentPermanent { .. }
            | Self::CurrentDelayed { .. }
            | Self::EnergyLimit { .. }
            | Self::Start { .. }
            | Self::Stop { .. }
            | Self::PhaseSource { .. }
            | Self::Phases { .. } => true,
            Self::Report(_) | Self::Output { .. } | Self::Display { .. } | Self::Unlock => false,
        }
    }

    /// Minimum time the send gate stays closed after this command.
    /// The firmware needs at least 100 ms between any two commands and
    /// considerably longer after the expensive ones.
    pub fn min_spacing(&self) -> Duration {
        match self {
            Self::Enable(false) => Duration::from_secs(2),
            Self::Start { .. } | Self::Stop { .. } => Duration::from_secs(1),
            _ => Duration::from_millis(100),
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
fn milliamps(amps: f64) -> i64 {
    (amps * 1000.0).round() as i64
}

/// Currents are either 0 (stop) or inside the hardware range 6-63 A.
fn validate_current(amps: f64) -> Result<(), ProtoError> {
    if !amps.is_finite() || (amps < 6.0 && amps != 0.0) || amps > 63.0 {
        return Err(ProtoError::validation(
            "current must be between 6 and 63 A, or 0 A",
        ));
    }
    Ok(())
}

fn validate_rfid_tag(tag: &str) -> Result<(), ProtoError> {
    if tag.is_empty() || tag.len() > 16 || !tag.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ProtoError::validation(
            "RFID tag must be a hex string of at most 8 bytes",
        ));
    }
    Ok(())
}

fn validate_rfid_class(class: &str) -> Result<(), ProtoError> {
    if class.is_empty() || class.len() > 20 || !class.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ProtoError::validation(
            "RFID class must be a hex string of at most 10 bytes",
        ));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn report_request() {
        assert_eq!(DeviceCommand::Report(2).encode().unwrap(), "report 2");
        assert_eq!(DeviceCommand::Report(100).encode().unwrap(), "report 100");
    }

    #[test]
    fn current_encodes_as_milliamps() {
        let cmd = DeviceCommand::CurrentPermanent { amps: 12.5 };
        assert_eq!(cmd.encode().unwrap(), "curr 12500");

        let cmd = DeviceCommand::CurrentPermanent { amps: 0.0 };
        assert_eq!(cmd.encode().unwrap(), "curr 0");
    }

    #[test]
    fn current_out_of_range_is_rejected() {
        for amps in [4.0, 63.5, -1.0, f64::NAN] {
            assert!(DeviceCommand::CurrentPermanent { amps }.encode().is_err());
        }
    }

    #[test]
    fn delayed_current() {
        let cmd = DeviceCommand::CurrentDelayed {
            amps: 6.0,
            delay_s: 30,
        };
        assert_eq!(cmd.encode().unwrap(), "currtime 6000 30");

        let cmd = DeviceCommand::CurrentDelayed {
            amps: 6.0,
            delay_s: 860_400,
        };
        assert!(cmd.encode().is_err());
    }

    #[test]
    fn failsafe_bounds() {
        let cmd = DeviceCommand::Failsafe {
            timeout_s: 30,
            fallback_amps: 6.0,
            persist: true,
        };
        assert_eq!(cmd.encode().unwrap(), "failsafe 30 6000 1");

        let cmd = DeviceCommand::Failsafe {
            timeout_s: 5,
            fallback_amps: 6.0,
            persist: false,
        };
        assert!(cmd.encode().is_err());

        let cmd = DeviceCommand::FailsafeOff { persist: false };
        assert_eq!(cmd.encode().unwrap(), "failsafe 0 0 0");
    }

    #[test]
    fn energy_encodes_in_tenth_watt_hours() {
        let cmd = DeviceCommand::EnergyLimit { kwh: 7.5 };
        assert_eq!(cmd.encode().unwrap(), "setenergy 75000");

        assert!(DeviceCommand::EnergyLimit { kwh: 0.5 }.encode().is_err());
        assert!(
            DeviceCommand::EnergyLimit { kwh: 10_000.0 }
                .encode()
                .is_err()
        );
    }

    #[test]
    fn output_accepts_states_and_pulse_rates() {
        assert_eq!(
            DeviceCommand::Output { value: 1 }.encode().unwrap(),
            "output 1"
        );
        assert_eq!(
            DeviceCommand::Output { value: 150 }.encode().unwrap(),
            "output 150"
        );
        assert!(DeviceCommand::Output { value: 5 }.encode().is_err());
        assert!(DeviceCommand::Output { value: 151 }.encode().is_err());
    }

    #[test]
    fn start_with_and_without_tag() {
        let cmd = DeviceCommand::Start {
            rfid: None,
            rfid_class: DEFAULT_RFID_CLASS.into(),
        };
        assert_eq!(cmd.encode().unwrap(), "start");

        let cmd = DeviceCommand::Start {
            rfid: Some("e3f76b8d".into()),
            rfid_class: DEFAULT_RFID_CLASS.into(),
        };
        assert_eq!(
            cmd.encode().unwrap(),
            "start e3f76b8d 01010400000000000000"
        );

        let cmd = DeviceCommand::Start {
            rfid: Some("not-hex!".into()),
            rfid_class: DEFAULT_RFID_CLASS.into(),
        };
        assert!(cmd.encode().is_err());
    }

    #[test]
    fn display_escapes_spaces_and_truncates() {
        let cmd = DeviceCommand::Display {
            text: "Hello World".into(),
            min_time_s: 2,
            max_time_s: 10,
        };
        assert_eq!(cmd.encode().unwrap(), "display 1 2 10 0 Hello$World");

        let cmd = DeviceCommand::Display {
            text: "x".repeat(40),
            min_time_s: 0,
            max_time_s: 0,
        };
        assert_eq!(cmd.encode().unwrap(), format!("display 1 0 0 0 {}", "x".repeat(23)));
    }

    #[test]
    fn phase_switching() {
        assert_eq!(
            DeviceCommand::PhaseSource { source: 4 }.encode().unwrap(),
            "x2src 4"
        );
        assert!(DeviceCommand::PhaseSource { source: 5 }.encode().is_err());
        assert_eq!(
            DeviceCommand::Phases { three_phases: true }.encode().unwrap(),
            "x2 1"
        );
    }

    #[test]
    fn mutating_commands_trigger_fast_polling() {
        assert!(DeviceCommand::Enable(true).triggers_fast_poll());
        assert!(DeviceCommand::CurrentPermanent { amps: 10.0 }.triggers_fast_poll());
        assert!(!DeviceCommand::Report(2).triggers_fast_poll());
        assert!(!DeviceCommand::Unlock.triggers_fast_poll());
    }

    #[test]
    fn expensive_commands_hold_the_send_gate_longer() {
        assert_eq!(
            DeviceCommand::Enable(false).min_spacing(),
            Duration::from_secs(2)
        );
        assert_eq!(
            DeviceCommand::Stop { rfid: None }.min_spacing(),
            Duration::from_secs(1)
        );
        assert_eq!(
            DeviceCommand::Report(2).min_spacing(),
            Duration::from_millis(100)
        );
    }
}
