// ── Device identity ──
//
// Built once from a validated identification report (report 1). The
// product string is a small ad-hoc grammar
// (`<maker>-<model>-<version>-<features>[-<country>]`) that decides
// which commands the station understands; classification happens here,
// in one place, instead of string-containment checks scattered around.

use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use kecontact_proto::report::{self, field};

use crate::error::CoreError;

// ── Classification enums ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum Manufacturer {
    #[strum(serialize = "KEBA")]
    Keba,
    #[strum(serialize = "BMW")]
    Bmw,
    #[strum(serialize = "unknown")]
    Unknown,
}

/// Known station models, each with a fixed capability set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum DeviceModel {
    #[strum(serialize = "P20")]
    KebaP20,
    #[strum(serialize = "P30")]
    KebaP30,
    /// German-market P30 variant without the integrated meter.
    #[strum(serialize = "P30-DE")]
    KebaP30De,
    #[strum(serialize = "Wallbox Connect")]
    BmwConnect,
    #[strum(serialize = "Wallbox Plus")]
    BmwPlus,
    #[strum(serialize = "unknown")]
    Unknown,
}

/// High-level commands a station model supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Capability {
    SetFailsafe,
    SetCurrent,
    SetChargingPower,
    SetEnergy,
    SetOutput,
    Display,
    Start,
    Stop,
}

// ── Product classification ──────────────────────────────────────────

/// Everything derivable from the product string alone.
struct ProductProfile {
    manufacturer: Manufacturer,
    model: DeviceModel,
    /// Friendly model name; falls back to the raw model token for
    /// products we cannot classify.
    model_name: String,
    services: BTreeSet<Capability>,
    meter_integrated: bool,
    authorization_integrated: bool,
    data_logger_integrated: bool,
    phase_switch_x2: bool,
}

/// The P30 variant sold without a meter. Identified by full product id.
const P30_DE_PRODUCT: &str = "KC-P30-EC220112-000-DE";

/// BMW products observed in the field; the naming scheme is opaque, so
/// these are literal matches.
const BMW_CONNECT_PRODUCTS: [&str; 1] = ["BMW-10-EC2405B2-E1R"];
const BMW_PLUS_PRODUCTS: [&str; 2] = ["BMW-10-EC240522-E1R", "BMW-10-ESS40022-E1R"];

fn classify_product(product: &str) -> Result<ProductProfile, String> {
    let tokens: Vec<&str> = product.split('-').collect();
    if tokens.len() < 4 {
        return Err(format!("product string {product:?} is not decomposable"));
    }
    let (maker, model_token, version, features) = (tokens[0], tokens[1], tokens[2], tokens[3]);

    // Every station understands these.
    let mut services = BTreeSet::from([
        Capability::SetFailsafe,
        Capability::SetCurrent,
        Capability::SetChargingPower,
    ]);

    let mut profile = ProductProfile {
        manufacturer: Manufacturer::Unknown,
        model: DeviceModel::Unknown,
        model_name: model_token.to_owned(),
        services: BTreeSet::new(),
        meter_integrated: false,
        authorization_integrated: false,
        data_logger_integrated: false,
        phase_switch_x2: false,
    };

    match maker {
        "KC" => {
            profile.manufacturer = Manufacturer::Keba;
            services.insert(Capability::SetOutput);
            profile.phase_switch_x2 = true;

            match model_token {
                "P30" => {
                    profile.authorization_integrated = true;
                    profile.data_logger_integrated = true;
                    if product.contains(P30_DE_PRODUCT) {
                        profile.model = DeviceModel::KebaP30De;
                        profile.model_name = DeviceModel::KebaP30De.to_string();
                    } else {
                        profile.model = DeviceModel::KebaP30;
                        profile.model_name = DeviceModel::KebaP30.to_string();
                        profile.meter_integrated = true;
                        services.insert(Capability::Display);
                    }
                }
                "P20" => {
                    profile.model = DeviceModel::KebaP20;
                    profile.model_name = DeviceModel::KebaP20.to_string();
                    // The product-version suffix encodes the series:
                    // 01 = e-series (bare), 10 = b-series (meter),
                    // 20/30 = c-series (meter).
                    if version.ends_with("10") || version.ends_with("20") || version.ends_with("30")
                    {
                        profile.meter_integrated = true;
                    }
                    // R feature code: RFID reader on board.
                    if features.contains('R') {
                        profile.authorization_integrated = true;
                    }
                }
                _ => {}
            }
        }
        "BMW" => {
            profile.manufacturer = Manufacturer::Bmw;
            if BMW_CONNECT_PRODUCTS.iter().any(|p| product.contains(p)) {
                profile.model = DeviceModel::BmwConnect;
                profile.model_name = DeviceModel::BmwConnect.to_string();
            } else if BMW_PLUS_PRODUCTS.iter().any(|p| product.contains(p)) {
                profile.model = DeviceModel::BmwPlus;
                profile.model_name = DeviceModel::BmwPlus.to_string();
            }
            profile.meter_integrated = true;
            profile.authorization_integrated = true;
            profile.data_logger_integrated = true;
        }
        _ => {
            warn!(product, "unrecognized manufacturer, capabilities limited");
        }
    }

    if profile.meter_integrated {
        services.insert(Capability::SetEnergy);
    }
    if profile.authorization_integrated {
        services.insert(Capability::Start);
        services.insert(Capability::Stop);
    }
    profile.services = services;

    Ok(profile)
}

// ── DeviceIdentity ──────────────────────────────────────────────────

/// Identity and capability set of one charging station.
///
/// Two identities are equal iff their serial numbers match — the host
/// is mutable (DHCP) and never part of identity.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceIdentity {
    pub host: IpAddr,
    pub serial: String,
    pub firmware: String,
    /// Raw product string as reported.
    pub product: String,
    pub manufacturer: Manufacturer,
    pub model: DeviceModel,
    pub model_name: String,
    pub services: BTreeSet<Capability>,
    pub meter_integrated: bool,
    pub authorization_integrated: bool,
    pub data_logger_integrated: bool,
    pub phase_switch_x2: bool,
    pub webconfig_url: String,
}

impl DeviceIdentity {
    /// Build an identity from a decoded identification report.
    ///
    /// Every required field is checked — a missing or malformed field is
    /// a validation failure, never a silent default.
    pub fn from_report(host: IpAddr, fields: &Map<String, Value>) -> Result<Self, CoreError> {
        let invalid = |reason: &str| CoreError::InvalidIdentification {
            host,
            reason: reason.to_owned(),
        };

        match report::report_id(fields) {
            Some(1) => {}
            Some(_) => return Err(invalid("not an identification report")),
            None => return Err(invalid("report does not contain an ID")),
        }

        let serial = match fields.get(field::SERIAL) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(invalid("report does not contain a serial number")),
        };
        let firmware = fields
            .get(field::FIRMWARE)
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("report does not contain a firmware version"))?
            .to_owned();
        let product = fields
            .get(field::PRODUCT)
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("report does not contain a product string"))?
            .to_owned();

        let profile = classify_product(&product)
            .map_err(|reason| CoreError::InvalidIdentification { host, reason })?;

        Ok(Self {
            host,
            serial,
            firmware,
            product,
            manufacturer: profile.manufacturer,
            model: profile.model,
            model_name: profile.model_name,
            services: profile.services,
            meter_integrated: profile.meter_integrated,
            authorization_integrated: profile.authorization_integrated,
            data_logger_integrated: profile.data_logger_integrated,
            phase_switch_x2: profile.phase_switch_x2,
            webconfig_url: format!("http://{host}"),
        })
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.services.contains(&capability)
    }

    /// Capability gate for session commands.
    pub(crate) fn require(
        &self,
        operation: &'static str,
        capability: Capability,
    ) -> Result<(), CoreError> {
        if self.supports(capability) {
            Ok(())
        } else {
            Err(CoreError::Unsupported {
                operation,
                model: self.model_name.clone(),
            })
        }
    }

    pub fn is_meter_integrated(&self) -> bool {
        self.meter_integrated
    }

    pub fn is_data_logger_integrated(&self) -> bool {
        self.data_logger_integrated
    }

    pub fn has_display(&self) -> bool {
        self.supports(Capability::Display)
    }

    pub fn has_phase_switch_x2(&self) -> bool {
        self.phase_switch_x2
    }
}

impl PartialEq for DeviceIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.serial == other.serial
    }
}

impl Eq for DeviceIdentity {}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({}, {}) at {}",
            self.manufacturer, self.model_name, self.serial, self.firmware, self.host
        )
    }
}
