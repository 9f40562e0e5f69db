//! `kecontact connect` — interactive command prompt against one station.

use std::io::Write as _;
use std::str::FromStr;

use tokio::io::{AsyncBufReadExt, BufReader};

use kecontact_core::{ChargingStation, ConnectionManager, StationOptions};
use kecontact_proto::DeviceCommand;

use crate::cli::{ConnectArgs, GlobalOpts};
use crate::error::CliError;

const HELP: &str = "\
Available commands:
  help                              this list
  info                              identity and capability set
  data                              dump the merged data store
  get <key>                         one value from the data store
  watch                             print every data update
  report <n>                        request report n (1, 2, 3, 100+)
  ena <on|off>                      enable / disable charging
  curr <amps>                       permanent current limit
  currtime <amps> <delay-s>         delayed current limit
  failsafe <timeout-s> <amps> <persist>   activate failsafe
  failsafe off                      deactivate failsafe
  setenergy <kwh>                   session energy limit (0 = off)
  output <n>                        X1 output: 0, 1 or pulses/kWh
  start [rfid [class]]              authorize charging
  stop [rfid]                       deauthorize charging
  display <text>                    show text on the display
  unlock                            unlock the socket
  x2 <1|3>                          one- or three-phase charging
  x2src <n>                         phase switch control source (0-4)
  power <kw>                        target charging power
  exit                              quit";

pub async fn handle(args: &ConnectArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let manager = ConnectionManager::connect(global.connection_config()).await?;
    let options = StationOptions {
        periodic_polling: args.poll,
        ..StationOptions::default()
    };

    let station = manager.setup_station(&args.host, options).await?;
    println!("Connected to {}", station.identity());
    println!("Type `help` for the command list, `exit` to quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt()?;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line == "exit" {
            break;
        }
        if !line.is_empty() {
            if let Err(e) = run_command(&station, line).await {
                eprintln!("{e}");
            }
        }
        prompt()?;
    }

    manager.shutdown().await;
    Ok(())
}

fn prompt() -> Result<(), CliError> {
    print!("> ");
    std::io::stdout().flush()?;
    Ok(())
}

async fn run_command(station: &ChargingStation, line: &str) -> Result<(), CliError> {
    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    match command {
        "help" | "?" => println!("{HELP}"),

        "info" => {
            let identity = station.identity();
            println!("{identity}");
            println!("  web config:  {}", identity.webconfig_url);
            println!("  meter:       {}", identity.is_meter_integrated());
            println!("  data logger: {}", identity.is_data_logger_integrated());
            println!("  services:");
            for service in &identity.services {
                println!("    {service}");
            }
        }

        "data" => match serde_json::to_string_pretty(&*station.data()) {
            Ok(dump) => println!("{dump}"),
            Err(e) => eprintln!("{e}"),
        },

        "get" => {
            let key = args.join(" ");
            if key.is_empty() {
                return Err(CliError::usage("usage: get <key>"));
            }
            match station.get_value(&key) {
                Some(value) => println!("{value}"),
                None => println!("(not set)"),
            }
        }

        "watch" => {
            station.add_observer(|station, data| {
                println!(
                    "[{}] {}",
                    station.host(),
                    serde_json::Value::Object(data.clone())
                );
            });
            println!("Observer registered; updates will print as they arrive.");
        }

        "report" => {
            let n = parse_arg(&args, 0, "report number")?;
            station.send_command(DeviceCommand::Report(n)).await?;
        }

        "ena" => match args.first().copied() {
            Some("on" | "1") => station.enable().await?,
            Some("off" | "0") => station.disable().await?,
            _ => return Err(CliError::usage("usage: ena <on|off>")),
        },

        "curr" => {
            let amps = parse_arg(&args, 0, "current in amps")?;
            station.set_current_permanent(amps).await?;
        }

        "currtime" => {
            let amps = parse_arg(&args, 0, "current in amps")?;
            let delay_s = parse_arg(&args, 1, "delay in seconds")?;
            station.set_current(amps, delay_s).await?;
        }

        "failsafe" => {
            if args.first() == Some(&"off") {
                station.disable_failsafe(false).await?;
            } else {
                let timeout_s = parse_arg(&args, 0, "timeout in seconds")?;
                let amps = parse_arg(&args, 1, "fallback current in amps")?;
                let persist = parse_arg(&args, 2, "persist flag")?;
                station.set_failsafe(timeout_s, amps, persist).await?;
            }
        }

        "setenergy" => {
            let kwh = parse_arg(&args, 0, "energy in kWh")?;
            station.set_energy(kwh).await?;
        }

        "output" => {
            let value = parse_arg(&args, 0, "output value")?;
            station.set_output(value).await?;
        }

        "start" => {
            station
                .start(args.first().copied(), args.get(1).copied())
                .await?;
        }

        "stop" => station.stop(args.first().copied()).await?,

        "display" => {
            let text = args.join(" ");
            if text.is_empty() {
                return Err(CliError::usage("usage: display <text>"));
            }
            station.display(&text, 2, 10).await?;
        }

        "unlock" => station.unlock_socket().await?,

        "x2" => match args.first().copied() {
            Some("3") => station.x2(true).await?,
            Some("1") => station.x2(false).await?,
            _ => return Err(CliError::usage("usage: x2 <1|3>")),
        },

        "x2src" => {
            let source = parse_arg(&args, 0, "source (0-4)")?;
            station.x2_source(source).await?;
        }

        "power" => {
            let kw = parse_arg(&args, 0, "power in kW")?;
            let started = station.set_charging_power(kw, false, true).await?;
            if !started {
                println!("Charging power could not be applied, see log output.");
            }
        }

        unknown => {
            return Err(CliError::usage(format!(
                "unknown command {unknown:?}, type `help` for the list"
            )));
        }
    }

    Ok(())
}

fn parse_arg<T: FromStr>(args: &[&str], index: usize, what: &str) -> Result<T, CliError> {
    args.get(index)
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| CliError::usage(format!("expected {what} at position {}", index + 1)))
}
