//! Device and SIM operations that need more than one round trip, plus the
//! parsers for the single-exchange ones.

use crate::error::{Error, Result};
use crate::protocol::command::{Command, Response, right_hand_side};
use crate::sequencer::{Exchange, Procedure, Step};

/// Identification reported by the modem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub revision: String,
    pub model: String,
    pub manufacturer: String,
    pub imei: String,
}

/// Command text for [`DeviceInfo`].
pub const DEVICE_INFO_QUERY: &str = "+CGMR;+CGMM;+CGMI;+CGSN";

impl DeviceInfo {
    /// Parses the reply to [`DEVICE_INFO_QUERY`].
    pub fn parse(response: &Response) -> Result<Self> {
        let info = response.information();
        let [revision, model, manufacturer, imei, ..] = info else {
            return Err(Error::Protocol {
                message: format!("expected four identification lines, got {info:?}"),
            });
        };

        Ok(Self {
            revision: right_hand_side(revision).to_owned(),
            model: right_hand_side(model).to_owned(),
            manufacturer: right_hand_side(manufacturer).to_owned(),
            imei: right_hand_side(imei).to_owned(),
        })
    }
}

/// Returns the value of the first information line starting with `prefix`.
pub(crate) fn first_value<'a>(response: &'a Response, prefix: &str) -> Result<&'a str> {
    response
        .information()
        .iter()
        .find(|line| line.starts_with(prefix))
        .map(|line| right_hand_side(line))
        .ok_or_else(|| Error::Protocol {
            message: format!("no {prefix} line in {:?}", response.lines()),
        })
}

/// Parses `+CFUN: <fun>`; anything but 0 means the antenna is powered.
pub(crate) fn parse_antenna_power(response: &Response) -> Result<bool> {
    let fun = first_value(response, "+CFUN")?;
    Ok(fun.split(',').next().map(str::trim) != Some("0"))
}

/// Parses `+CPIN: <code>`.
pub(crate) fn parse_auth_status(response: &Response) -> Result<String> {
    first_value(response, "+CPIN").map(str::to_owned)
}

/// Switches the antenna, skipping the write if it already has the wanted state.
///
/// Finishes with true if `+CFUN` was written.
#[derive(Debug)]
pub(crate) struct SetAntennaPower {
    power: bool,
    written: bool,
}

impl SetAntennaPower {
    pub(crate) const fn new(power: bool) -> Self {
        Self {
            power,
            written: false,
        }
    }
}

impl Procedure for SetAntennaPower {
    type Output = bool;

    fn begin(&mut self) -> Step<bool> {
        Step::Send(Command::at("+CFUN?").valid_prefixes(["+CFUN"]))
    }

    fn resume(&mut self, exchange: Exchange) -> Step<bool> {
        let response = match exchange.outcome {
            Ok(response) => response,
            Err(e) => return Step::Finish(Err(e)),
        };
        if self.written {
            return Step::Finish(Ok(true));
        }

        match parse_antenna_power(&response) {
            Ok(current) if current == self.power => {
                tracing::debug!("antenna power already {}", self.power);
                Step::Finish(Ok(false))
            }
            Ok(_) => {
                self.written = true;
                Step::Send(Command::at(format!("+CFUN={}", u8::from(self.power))))
            }
            Err(e) => Step::Finish(Err(e)),
        }
    }
}

/// Sends a PIN, then reads back the authentication status.
///
/// Finishes with the new status, or `None` if the read-back failed after
/// the code was accepted.
#[derive(Debug)]
pub(crate) struct SendAuthCode {
    code: String,
    accepted: bool,
}

impl SendAuthCode {
    pub(crate) fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            accepted: false,
        }
    }
}

impl Procedure for SendAuthCode {
    type Output = Option<String>;

    fn begin(&mut self) -> Step<Option<String>> {
        Step::Send(Command::at(format!("+CPIN=\"{}\"", self.code)))
    }

    fn resume(&mut self, exchange: Exchange) -> Step<Option<String>> {
        if !self.accepted {
            return match exchange.outcome {
                Ok(_) => {
                    self.accepted = true;
                    Step::Send(Command::at("+CPIN?").valid_prefixes(["+CPIN"]))
                }
                Err(e) => Step::Finish(Err(e)),
            };
        }

        match exchange.outcome.and_then(|response| parse_auth_status(&response)) {
            Ok(status) => Step::Finish(Ok(Some(status))),
            Err(e) => {
                tracing::warn!("auth status after {:?} unavailable: {}", exchange.request, e);
                Step::Finish(Ok(None))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeviceError;
    use crate::sequencer::Sequencer;

    fn response(lines: &[&str]) -> Response {
        Response::new(lines.iter().map(|&l| l.to_owned()).collect())
    }

    fn sent(step: Step<impl std::fmt::Debug>) -> String {
        match step {
            Step::Send(command) => command.text().to_owned(),
            Step::Finish(result) => panic!("finished early with {result:?}"),
        }
    }

    #[test]
    fn test_device_info_parse() {
        let info = DeviceInfo::parse(&response(&[
            "+CGMR: \"HW: GTA02BV5\"",
            "+CGMM: \"Neo1973 GTA02 Embedded GSM Modem\"",
            "+CGMI: FIC/OpenMoko",
            "+CGSN: 354651011234567",
            "OK",
        ]))
        .unwrap();
        assert_eq!(info.revision, "HW: GTA02BV5");
        assert_eq!(info.model, "Neo1973 GTA02 Embedded GSM Modem");
        assert_eq!(info.manufacturer, "FIC/OpenMoko");
        assert_eq!(info.imei, "354651011234567");

        assert!(DeviceInfo::parse(&response(&["+CGMR: 1", "OK"])).is_err());
    }

    #[test]
    fn test_antenna_power_parse() {
        assert!(parse_antenna_power(&response(&["+CFUN: 1", "OK"])).unwrap());
        assert!(!parse_antenna_power(&response(&["+CFUN: 0", "OK"])).unwrap());
        assert!(parse_antenna_power(&response(&["OK"])).is_err());
    }

    #[test]
    fn test_set_antenna_power_skips_when_unchanged() {
        let mut seq = Sequencer::new(SetAntennaPower::new(true));
        assert_eq!(sent(seq.start().unwrap()), "+CFUN?");
        let step = seq.resume(Ok(response(&["+CFUN: 1", "OK"]))).unwrap();
        assert!(matches!(step, Step::Finish(Ok(false))));
    }

    #[test]
    fn test_set_antenna_power_writes_when_different() {
        let mut seq = Sequencer::new(SetAntennaPower::new(false));
        seq.start().unwrap();
        let step = seq.resume(Ok(response(&["+CFUN: 1", "OK"]))).unwrap();
        assert_eq!(sent(step), "+CFUN=0");
        let step = seq.resume(Ok(response(&["OK"]))).unwrap();
        assert!(matches!(step, Step::Finish(Ok(true))));
    }

    #[test]
    fn test_send_auth_code_rejected() {
        let mut seq = Sequencer::new(SendAuthCode::new("0000"));
        assert_eq!(sent(seq.start().unwrap()), "+CPIN=\"0000\"");
        let rejected = Error::DeviceFailed {
            command: "+CPIN=\"0000\"".into(),
            reason: DeviceError::Cme(16),
        };
        let step = seq.resume(Err(rejected)).unwrap();
        assert!(matches!(step, Step::Finish(Err(Error::DeviceFailed { .. }))));
    }

    #[test]
    fn test_send_auth_code_reads_back_status() {
        let mut seq = Sequencer::new(SendAuthCode::new("1234"));
        seq.start().unwrap();
        assert_eq!(sent(seq.resume(Ok(response(&["OK"]))).unwrap()), "+CPIN?");
        let step = seq.resume(Ok(response(&["+CPIN: READY", "OK"]))).unwrap();
        assert!(matches!(step, Step::Finish(Ok(Some(ref s))) if s == "READY"));
    }
}
