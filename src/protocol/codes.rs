//! Numeric error codes reported by `+CME ERROR`, `+CMS ERROR` and `+EXT ERROR`.
//!
//! Texts follow 3GPP TS 27.007 (CME) and TS 27.005 (CMS).

/// What a failed command means for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// No SIM card is inserted.
    SimNotPresent,
    /// A PIN/PUK is required or was not accepted.
    SimAuthFailed,
    /// The SIM is blocked.
    SimBlocked,
    /// The requested SIM record does not exist.
    SimNotFound,
    /// The SIM storage is full.
    SimMemoryFull,
    /// The SIM record index is invalid.
    SimInvalidIndex,
    /// The operation needs network authorization.
    NetworkUnauthorized,
    /// There is no network service.
    NetworkNotPresent,
    /// The call could not be established or was dropped.
    CallNoCarrier,
    /// Anything else.
    Generic,
}

/// Returns the text for a `+CME ERROR` code.
#[must_use]
pub const fn cme_text(code: u16) -> &'static str {
    match code {
        0 => "Phone failure",
        1 => "No connection to phone",
        2 => "Phone adapter link reserved",
        3 => "Operation not allowed",
        4 => "Operation not supported",
        5 => "PH_SIM PIN required",
        6 => "PH_FSIM PIN required",
        7 => "PH_FSIM PUK required",
        10 => "SIM not inserted",
        11 => "SIM PIN required",
        12 => "SIM PUK required",
        13 => "SIM failure",
        14 => "SIM busy",
        15 => "SIM wrong",
        16 => "Incorrect password",
        17 => "SIM PIN2 required",
        18 => "SIM PUK2 required",
        20 => "Memory full",
        21 => "Invalid index",
        22 => "Not found",
        23 => "Memory failure",
        24 => "Text string too long",
        25 => "Invalid characters in text string",
        26 => "Dial string too long",
        27 => "Invalid characters in dial string",
        30 => "No network service",
        31 => "Network timeout",
        32 => "Network not allowed, emergency calls only",
        40 => "Network personalization PIN required",
        41 => "Network personalization PUK required",
        42 => "Network subset personalization PIN required",
        43 => "Network subset personalization PUK required",
        44 => "Service provider personalization PIN required",
        45 => "Service provider personalization PUK required",
        46 => "Corporate personalization PIN required",
        47 => "Corporate personalization PUK required",
        48 => "PH-SIM PUK required",
        100 => "Unknown error",
        103 => "Illegal MS",
        106 => "Illegal ME",
        107 => "GPRS services not allowed",
        111 => "PLMN not allowed",
        112 => "Location area not allowed",
        113 => "Roaming not allowed in this location area",
        126 | 256 => "Operation temporarily not allowed",
        132 => "Service operation not supported",
        133 => "Requested service option not subscribed",
        134 => "Service option temporarily out of order",
        148 => "Unspecified GPRS error",
        149 => "PDP authentication failure",
        150 => "Invalid mobile class",
        257 => "Call barred",
        258 => "Phone is busy",
        259 => "User abort",
        260 => "Invalid dial string",
        261 => "SS not executed",
        262 => "SIM blocked",
        263 => "Invalid block",
        772 => "SIM powered down",
        _ => "Unknown CME error",
    }
}

/// Returns the text for a `+CMS ERROR` code.
#[must_use]
pub const fn cms_text(code: u16) -> &'static str {
    match code {
        1 => "Unassigned number",
        8 => "Operator determined barring",
        10 => "Call barred",
        21 => "Short message transfer rejected",
        27 => "Destination out of service",
        28 => "Unidentified subscriber",
        29 => "Facility rejected",
        30 => "Unknown subscriber",
        38 => "Network out of order",
        41 => "Temporary failure",
        42 => "Congestion",
        47 => "Resources unavailable",
        50 => "Requested facility not subscribed",
        69 => "Requested facility not implemented",
        96 => "Invalid mandatory information",
        111 => "Protocol error, unspecified",
        176 => "TPDU not supported",
        192 => "SC busy",
        193 => "No SC subscription",
        194 => "SC system failure",
        195 => "Invalid SME address",
        208 => "D0 SIM SMS storage full",
        209 => "No SMS storage capability in SIM",
        210 => "Error in MS",
        211 => "Memory capacity exceeded",
        255 => "Unspecified error cause",
        300 => "ME failure",
        301 => "SMS service of ME reserved",
        302 => "Operation not allowed",
        303 => "Operation not supported",
        304 => "Invalid PDU mode parameter",
        305 => "Invalid text mode parameter",
        310 => "SIM not inserted",
        311 => "SIM PIN required",
        312 => "PH-SIM PIN required",
        313 => "SIM failure",
        314 => "SIM busy",
        315 => "SIM wrong",
        316 => "SIM PUK required",
        317 => "SIM PIN2 required",
        318 => "SIM PUK2 required",
        320 => "Memory failure",
        321 => "Invalid memory index",
        322 => "Memory full",
        330 => "SMSC address unknown",
        331 => "No network service",
        332 => "Network timeout",
        340 => "No +CNMA expected",
        500 => "Unknown error",
        512 => "User abort",
        513 => "Unable to store",
        514 => "Invalid status",
        516 => "Invalid length",
        517 => "Invalid character in PDU",
        518 | 538 => "Invalid parameter",
        521 => "Timer expired",
        522 => "Operation temporarily not allowed",
        532 => "SIM not ready",
        535 => "Protocol stack busy",
        _ => "Unknown CMS error",
    }
}

/// Returns the text for a `+EXT ERROR` code.
#[must_use]
pub const fn ext_text(code: u16) -> &'static str {
    match code {
        0 => "Invalid parameter",
        _ => "Unknown EXT error",
    }
}

/// Maps a `+CME ERROR` code to its category.
///
/// CME 3 shows up both for `+COPS=0` while the SIM is locked and for an
/// out-of-bounds phonebook read; it is reported as network-unauthorized.
#[must_use]
pub const fn cme_category(code: u16) -> ErrorCategory {
    match code {
        3 => ErrorCategory::NetworkUnauthorized,
        10 => ErrorCategory::SimNotPresent,
        5 | 6 | 7 | 11 | 12 | 15 | 16 | 17 | 18 | 48 => ErrorCategory::SimAuthFailed,
        21 | 22 => ErrorCategory::SimNotFound,
        30 => ErrorCategory::NetworkNotPresent,
        32 | 262 => ErrorCategory::SimBlocked,
        _ => ErrorCategory::Generic,
    }
}

/// Maps a `+CMS ERROR` code to its category.
#[must_use]
pub const fn cms_category(code: u16) -> ErrorCategory {
    match code {
        310 => ErrorCategory::SimNotPresent,
        311 | 312 | 316 | 317 | 318 => ErrorCategory::SimAuthFailed,
        321 => ErrorCategory::SimNotFound,
        322 => ErrorCategory::SimMemoryFull,
        _ => ErrorCategory::Generic,
    }
}

/// Maps a `+EXT ERROR` code to its category.
#[must_use]
pub const fn ext_category(code: u16) -> ErrorCategory {
    match code {
        0 => ErrorCategory::SimInvalidIndex,
        _ => ErrorCategory::Generic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cme_mapping() {
        assert_eq!(cme_category(10), ErrorCategory::SimNotPresent);
        assert_eq!(cme_category(16), ErrorCategory::SimAuthFailed);
        assert_eq!(cme_category(262), ErrorCategory::SimBlocked);
        assert_eq!(cme_category(999), ErrorCategory::Generic);
        assert_eq!(cme_text(30), "No network service");
    }

    #[test]
    fn test_cms_mapping() {
        assert_eq!(cms_category(322), ErrorCategory::SimMemoryFull);
        assert_eq!(cms_category(321), ErrorCategory::SimNotFound);
        assert_eq!(cms_text(330), "SMSC address unknown");
    }

    #[test]
    fn test_ext_mapping() {
        assert_eq!(ext_category(0), ErrorCategory::SimInvalidIndex);
        assert_eq!(ext_text(7), "Unknown EXT error");
    }
}
