//! serde adapters referenced from the generated protobuf types.
//!
//! prost represents enums as `i32` and bytes as `Vec<u8>`. The gateway's
//! JSON shape uses the symbolic enum name and base64 text instead, so the
//! build script attaches these modules with `#[serde(with = ...)]`.

use serde::Deserialize;

/// Accepts either the symbolic name or the numeric value of an enum.
#[derive(Deserialize)]
#[serde(untagged)]
enum NameOrNumber {
    Number(i32),
    Name(String),
}

/// Declares a serde adapter module for one prost enum.
macro_rules! enum_by_name {
    ($module:ident, $enum:path) => {
        pub mod $module {
            use serde::{Deserialize, Deserializer, Serializer};

            use super::NameOrNumber;
            use $enum as Enum;

            pub fn serialize<S: Serializer>(value: &i32, serializer: S) -> Result<S::Ok, S::Error> {
                match Enum::try_from(*value) {
                    Ok(variant) => serializer.serialize_str(variant.as_str_name()),
                    Err(_) => serializer.serialize_i32(*value),
                }
            }

            pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
                let raw = NameOrNumber::deserialize(deserializer)?;
                let variant = match raw {
                    NameOrNumber::Number(n) => Enum::try_from(n).ok(),
                    NameOrNumber::Name(name) => Enum::from_str_name(&name)
                        .or_else(|| name.parse::<i32>().ok().and_then(|n| Enum::try_from(n).ok())),
                };
                variant.map(|v| v as i32).ok_or_else(|| {
                    serde::de::Error::custom(format!(
                        "unknown {} value",
                        stringify!($module)
                    ))
                })
            }
        }
    };
}

enum_by_name!(rx_window, crate::api::RxWindow);
enum_by_name!(error_type, crate::appserver::ErrorType);

/// Bytes as standard base64 text.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use crate::api;

    #[test]
    fn enums_serialize_by_name_and_defaults_are_emitted(
    ) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let node = api::GetNodeResponse {
            dev_eui: "0102030405060708".into(),
            rx_window: api::RxWindow::Rx2 as i32,
            ..Default::default()
        };
        let value = serde_json::to_value(&node)?;
        assert_eq!(value["rxWindow"], "RX2");
        assert_eq!(value["rxDelay"], 0);
        assert_eq!(value["isAbp"], false);
        assert_eq!(value["name"], "");
        assert_eq!(value["channelListId"], 0);
        Ok(())
    }

    #[test]
    fn enums_accept_name_or_number() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let by_name: api::CreateNodeRequest = serde_json::from_str(r#"{"rxWindow":"RX2"}"#)?;
        let by_number: api::CreateNodeRequest = serde_json::from_str(r#"{"rxWindow":1}"#)?;
        assert_eq!(by_name.rx_window, api::RxWindow::Rx2 as i32);
        assert_eq!(by_number.rx_window, api::RxWindow::Rx2 as i32);

        let unknown = serde_json::from_str::<api::CreateNodeRequest>(r#"{"rxWindow":"RX9"}"#);
        assert!(unknown.is_err());
        Ok(())
    }

    #[test]
    fn bytes_use_base64() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let item = api::DownlinkQueueItem {
            data: vec![1, 2, 3],
            ..Default::default()
        };
        let value = serde_json::to_value(&item)?;
        assert_eq!(value["data"], "AQID");

        let parsed: api::EnqueueDownlinkQueueItemRequest =
            serde_json::from_str(r#"{"devEui":"x","fPort":10,"data":"AQID"}"#)?;
        assert_eq!(parsed.data, vec![1, 2, 3]);
        Ok(())
    }

    #[test]
    fn missing_fields_take_defaults() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let req: api::ListChannelListRequest = serde_json::from_str("{}")?;
        assert_eq!(req.limit, 0);
        assert_eq!(req.offset, 0);
        Ok(())
    }
}
