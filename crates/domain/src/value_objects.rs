use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 统一的时间戳类型。
pub type Timestamp = DateTime<Utc>;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new(id: Uuid) -> Self {
                Self(id)
            }

            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// 用户唯一标识。
    UserId
);
uuid_id!(
    /// 消息唯一标识。
    MessageId
);
uuid_id!(
    /// 会话唯一标识。
    ConversationId
);
uuid_id!(
    /// 单个实时连接的标识，仅在进程内有效。
    ConnectionId
);

/// 连接的设备标签，用于多端在线统计。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceLabel(String);

impl DeviceLabel {
    pub const ANDROID: &'static str = "Android";
    pub const IOS: &'static str = "iOS";
    pub const WEB: &'static str = "Web";
    pub const UNKNOWN: &'static str = "Unknown";

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// 显式参数优先，否则根据 User-Agent 推断。
    pub fn infer(explicit: Option<&str>, user_agent: Option<&str>) -> Self {
        if let Some(label) = explicit.map(str::trim).filter(|s| !s.is_empty()) {
            return Self::new(label);
        }

        match user_agent.map(str::trim).filter(|s| !s.is_empty()) {
            Some(ua) if ua.contains("Android") => Self::new(Self::ANDROID),
            Some(ua) if ua.contains("iPhone") || ua.contains("iPad") => Self::new(Self::IOS),
            Some(_) => Self::new(Self::WEB),
            None => Self::new(Self::UNKNOWN),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
