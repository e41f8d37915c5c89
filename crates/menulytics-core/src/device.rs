use serde::{Deserialize, Serialize};

use crate::event::DeviceType;

/// Coarse client classification attached to every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_type: DeviceType,
    pub browser: String,
    pub os: String,
}

impl DeviceInfo {
    /// Classify a `User-Agent` string.
    ///
    /// Device class is decided by substring checks (tablets first, since
    /// tablet UAs often also say "mobile"-ish things); browser and OS names
    /// come from `woothee`. Anything unrecognised is `"Unknown"`.
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.to_ascii_lowercase();
        let parsed = if user_agent.is_empty() {
            None
        } else {
            woothee::parser::Parser::new().parse(user_agent)
        };

        let browser = parsed
            .as_ref()
            .map(|r| r.name)
            .filter(|name| !name.is_empty() && *name != "UNKNOWN")
            .unwrap_or("Unknown")
            .to_string();
        let os = parsed
            .as_ref()
            .map(|r| r.os)
            .filter(|os| !os.is_empty() && *os != "UNKNOWN")
            .unwrap_or("Unknown")
            .to_string();

        Self {
            device_type: classify_device(&ua),
            browser,
            os,
        }
    }
}

fn classify_device(ua: &str) -> DeviceType {
    let android = ua.contains("android");
    if ua.contains("ipad") || ua.contains("tablet") || (android && !ua.contains("mobile")) {
        DeviceType::Tablet
    } else if ua.contains("mobi") || ua.contains("iphone") || ua.contains("ipod") || android {
        DeviceType::Mobile
    } else {
        DeviceType::Desktop
    }
}
