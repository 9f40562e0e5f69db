// ── Report decoding and unit scaling ──
//
// Reports arrive as flat JSON objects with raw integer fields. The
// firmware encodes currents in milliamps, energy in 0.1 Wh and power in
// milliwatts; `humanize` rewrites a decoded report into the units a
// caller actually wants, and derives the boolean convenience flags the
// raw payload only encodes implicitly.

use std::time::Duration;

use serde_json::{Map, Value};

use crate::error::ProtoError;

/// Field names as they appear on the wire (and in the merged data store).
pub mod field {
    pub const ID: &str = "ID";
    pub const SERIAL: &str = "Serial";
    pub const FIRMWARE: &str = "Firmware";
    pub const PRODUCT: &str = "Product";
    pub const SEC: &str = "Sec";
    pub const UPTIME_PRETTY: &str = "uptime_pretty";

    pub const MAX_CURR_PERCENT: &str = "Max curr %";
    pub const MAX_CURR: &str = "Max curr";
    pub const CURR_HW: &str = "Curr HW";
    pub const CURR_USER: &str = "Curr user";
    pub const CURR_FS: &str = "Curr FS";
    pub const CURR_TIMER: &str = "Curr timer";
    pub const I1: &str = "I1";
    pub const I2: &str = "I2";
    pub const I3: &str = "I3";
    pub const U1: &str = "U1";
    pub const U2: &str = "U2";
    pub const U3: &str = "U3";
    pub const PF: &str = "PF";
    pub const P: &str = "P";

    pub const SETENERGY: &str = "Setenergy";
    pub const E_PRES: &str = "E pres";
    pub const E_TOTAL: &str = "E total";
    pub const E_START: &str = "E start";

    pub const PLUG: &str = "Plug";
    pub const PLUG_CHARGING_STATION: &str = "Plug_charging_station";
    pub const PLUG_LOCKED: &str = "Plug_locked";
    pub const PLUG_EV: &str = "Plug_EV";

    pub const STATE: &str = "State";
    pub const STATE_ON: &str = "State_on";
    pub const STATE_DETAILS: &str = "State_details";

    pub const TMO_FS: &str = "Tmo FS";
    pub const FS_ON: &str = "FS_on";

    pub const AUTHREQ: &str = "Authreq";
    pub const ENABLE_USER: &str = "Enable user";
}

/// Fields transmitted in milliamps (or per-mille for `Max curr %`).
const THOUSANDS: [&str; 10] = [
    field::MAX_CURR_PERCENT,
    field::MAX_CURR,
    field::CURR_HW,
    field::CURR_USER,
    field::CURR_FS,
    field::CURR_TIMER,
    field::I1,
    field::I2,
    field::I3,
    field::PF,
];

/// Fields transmitted in 0.1 Wh.
const TEN_THOUSANDS: [&str; 4] = [
    field::SETENERGY,
    field::E_PRES,
    field::E_TOTAL,
    field::E_START,
];

/// Decode a payload into a flat key/value object.
pub fn decode(payload: &str) -> Result<Map<String, Value>, ProtoError> {
    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ProtoError::MalformedReport {
            reason: format!("expected an object, got {other}"),
        }),
        Err(e) => Err(ProtoError::MalformedReport {
            reason: e.to_string(),
        }),
    }
}

/// Extract the report id. The firmware sends it either as a string
/// (`"ID": "2"`) or as a bare number, depending on model and report.
pub fn report_id(fields: &Map<String, Value>) -> Option<u64> {
    match fields.get(field::ID)? {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    v.as_f64()
}

fn as_i64(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Rewrite raw report fields into human units and derive the implicit
/// boolean flags. Unknown keys pass through untouched.
#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
pub fn humanize(fields: &mut Map<String, Value>) {
    // Uptime seconds get a readable twin.
    if let Some(secs) = fields.get(field::SEC).and_then(Value::as_u64) {
        let pretty = humantime::format_duration(Duration::from_secs(secs)).to_string();
        fields.insert(field::UPTIME_PRETTY.into(), Value::from(pretty));
    }

    for key in THOUSANDS {
        if let Some(v) = fields.get(key).and_then(as_f64) {
            fields.insert(key.into(), Value::from(v / 1000.0));
        }
    }

    // `Max curr %` is per-mille on the wire.
    if let Some(v) = fields.get(field::MAX_CURR_PERCENT).and_then(as_f64) {
        fields.insert(field::MAX_CURR_PERCENT.into(), Value::from(v / 10.0));
    }

    for key in TEN_THOUSANDS {
        if let Some(v) = fields.get(key).and_then(as_f64) {
            fields.insert(key.into(), Value::from(round2(v / 10_000.0)));
        }
    }

    // Plug state is a bit set: 1 = cable on station, 3 = locked on
    // station, 5 = cable on EV, 7 = locked on both.
    if let Some(plug) = fields.get(field::PLUG).and_then(as_i64) {
        fields.insert(field::PLUG_CHARGING_STATION.into(), Value::from(plug > 0));
        fields.insert(
            field::PLUG_LOCKED.into(),
            Value::from(plug == 3 || plug == 7),
        );
        fields.insert(field::PLUG_EV.into(), Value::from(plug > 4));
    }

    if let Some(state) = fields.get(field::STATE).and_then(as_i64) {
        fields.insert(field::STATE_ON.into(), Value::from(state == 3));
        let details = match state {
            0 => "starting",
            1 => "not ready for charging",
            2 => "ready for charging",
            3 => "charging",
            4 => "error",
            5 => "authorization rejected",
            _ => "State undefined",
        };
        fields.insert(field::STATE_DETAILS.into(), Value::from(details));
    }

    if let Some(tmo) = fields.get(field::TMO_FS).and_then(as_f64) {
        fields.insert(field::FS_ON.into(), Value::from(tmo > 0.0));
    }

    if let Some(p) = fields.get(field::P).and_then(as_f64) {
        fields.insert(field::P.into(), Value::from(round2(p / 1_000_000.0)));
    }

    // A hardware limit of 0 A means "no PWM signal" — not a real limit.
    if fields.get(field::CURR_HW).and_then(as_f64) == Some(0.0) {
        fields.remove(field::CURR_HW);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn decode_rejects_non_objects() {
        assert!(decode("[1, 2]").is_err());
        assert!(decode("{broken").is_err());
        assert!(decode(r#"{"ID": "2"}"#).is_ok());
    }

    #[test]
    fn report_id_handles_string_and_number() {
        assert_eq!(report_id(&obj(json!({"ID": "2"}))), Some(2));
        assert_eq!(report_id(&obj(json!({"ID": 103}))), Some(103));
        assert_eq!(report_id(&obj(json!({"State": 3}))), None);
    }

    #[test]
    fn currents_scale_from_milliamps() {
        let mut fields = obj(json!({"Curr user": 63000, "I1": 15500, "PF": 1000}));
        humanize(&mut fields);
        assert_eq!(fields["Curr user"], json!(63.0));
        assert_eq!(fields["I1"], json!(15.5));
        assert_eq!(fields["PF"], json!(1.0));
    }

    #[test]
    fn max_curr_percent_is_per_mille() {
        let mut fields = obj(json!({"Max curr %": 1000}));
        humanize(&mut fields);
        assert_eq!(fields["Max curr %"], json!(0.1));
    }

    #[test]
    fn energy_scales_and_rounds() {
        let mut fields = obj(json!({"E pres": 29532, "E total": 9999999999_u64}));
        humanize(&mut fields);
        assert_eq!(fields["E pres"], json!(2.95));
        assert_eq!(fields["E total"], json!(1_000_000.0));
    }

    #[test]
    fn power_scales_from_milliwatts() {
        let mut fields = obj(json!({"P": 11040000}));
        humanize(&mut fields);
        assert_eq!(fields["P"], json!(11.04));
    }

    #[test]
    fn plug_flags_derive_from_bit_set() {
        let mut fields = obj(json!({"Plug": 7}));
        humanize(&mut fields);
        assert_eq!(fields["Plug_charging_station"], json!(true));
        assert_eq!(fields["Plug_locked"], json!(true));
        assert_eq!(fields["Plug_EV"], json!(true));

        let mut fields = obj(json!({"Plug": 3}));
        humanize(&mut fields);
        assert_eq!(fields["Plug_locked"], json!(true));
        assert_eq!(fields["Plug_EV"], json!(false));

        let mut fields = obj(json!({"Plug": 5}));
        humanize(&mut fields);
        assert_eq!(fields["Plug_locked"], json!(false));
        assert_eq!(fields["Plug_EV"], json!(true));
    }

    #[test]
    fn state_derives_flag_and_details() {
        let mut fields = obj(json!({"State": 3}));
        humanize(&mut fields);
        assert_eq!(fields["State_on"], json!(true));
        assert_eq!(fields["State_details"], json!("charging"));

        let mut fields = obj(json!({"State": 9}));
        humanize(&mut fields);
        assert_eq!(fields["State_on"], json!(false));
        assert_eq!(fields["State_details"], json!("State undefined"));
    }

    #[test]
    fn failsafe_flag_derives_from_timeout() {
        let mut fields = obj(json!({"Tmo FS": 30}));
        humanize(&mut fields);
        assert_eq!(fields["FS_on"], json!(true));
    }

    #[test]
    fn zero_hardware_limit_is_removed() {
        let mut fields = obj(json!({"Curr HW": 0}));
        humanize(&mut fields);
        assert!(!fields.contains_key("Curr HW"));
    }

    #[test]
    fn uptime_gets_a_pretty_twin() {
        let mut fields = obj(json!({"Sec": 3723}));
        humanize(&mut fields);
        assert_eq!(fields["Sec"], json!(3723));
        assert_eq!(fields["uptime_pretty"], json!("1h 2m 3s"));
    }

    #[test]
    fn unknown_keys_pass_through() {
        let mut fields = obj(json!({"Serial": "15017355", "Output": 0}));
        humanize(&mut fields);
        assert_eq!(fields["Serial"], json!("15017355"));
        assert_eq!(fields["Output"], json!(0));
    }
}
