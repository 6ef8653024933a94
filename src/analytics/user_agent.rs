//! User-agent classification

use woothee::parser::Parser;

use crate::models::DeviceType;

const UNKNOWN: &str = "Unknown";

/// Markers of automated clients that woothee reports as ordinary browsers
const BOT_MARKERS: [&str; 6] = ["bot", "crawler", "spider", "headless", "lighthouse", "slurp"];

/// Structured flags extracted from a raw user-agent string
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UaFlags {
    pub is_mobile: bool,
    pub is_tablet: bool,
    pub is_desktop: bool,
    pub is_bot: bool,
    pub os: String,
    pub browser: String,
}

impl UaFlags {
    pub fn parse(user_agent: &str) -> Self {
        let ua = user_agent.trim();
        let lowered = ua.to_ascii_lowercase();
        let marked_bot = BOT_MARKERS.iter().any(|m| lowered.contains(m));

        if ua.is_empty() {
            return Self {
                os: UNKNOWN.to_string(),
                browser: UNKNOWN.to_string(),
                ..Default::default()
            };
        }

        let Some(result) = Parser::new().parse(ua) else {
            return Self {
                is_bot: marked_bot,
                os: UNKNOWN.to_string(),
                browser: UNKNOWN.to_string(),
                ..Default::default()
            };
        };

        let handheld = matches!(result.category, "smartphone" | "mobilephone");
        let is_tablet = handheld
            && (result.os == "iPad"
                || lowered.contains("tablet")
                || (result.os == "Android" && !lowered.contains("mobile")));

        Self {
            is_mobile: handheld && !is_tablet,
            is_tablet,
            is_desktop: result.category == "pc",
            is_bot: result.category == "crawler" || marked_bot,
            os: clean_name(result.os),
            browser: clean_name(result.name),
        }
    }
}

fn clean_name(name: &str) -> String {
    let name = name.trim();
    if name.is_empty() || name == "UNKNOWN" {
        UNKNOWN.to_string()
    } else {
        name.to_string()
    }
}

struct DeviceRule {
    device: DeviceType,
    applies: fn(&UaFlags) -> bool,
}

/// Resolution order for device types; the first matching rule wins.
/// Bot sits ahead of Desktop so headless and crawler agents that also look
/// like desktop browsers are not counted as people.
const DEVICE_RULES: [DeviceRule; 4] = [
    DeviceRule {
        device: DeviceType::Mobile,
        applies: |f| f.is_mobile,
    },
    DeviceRule {
        device: DeviceType::Tablet,
        applies: |f| f.is_tablet,
    },
    DeviceRule {
        device: DeviceType::Bot,
        applies: |f| f.is_bot,
    },
    DeviceRule {
        device: DeviceType::Desktop,
        applies: |f| f.is_desktop,
    },
];

pub fn resolve_device_type(flags: &UaFlags) -> DeviceType {
    DEVICE_RULES
        .iter()
        .find(|rule| (rule.applies)(flags))
        .map(|rule| rule.device)
        .unwrap_or(DeviceType::Unknown)
}
