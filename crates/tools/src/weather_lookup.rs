//! Weather lookup tool — returns mock weather data.
//!
//! The data is derived from a hash of the location name, so the agent loop
//! can be exercised end-to-end without network access and the same location
//! always yields the same report.

use async_trait::async_trait;
use chatloop_core::error::ToolError;
use chatloop_core::tool::{Tool, ToolArguments, ToolContext, ToolOutput};
use serde::Serialize;

pub const TOOL_NAME: &str = "tool_get_weather";

pub struct WeatherLookupTool;

#[async_trait]
impl Tool for WeatherLookupTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Look up current weather conditions for a location. Returns temperature, conditions, humidity, and wind speed."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "The city name or location to look up weather for"
                },
                "units": {
                    "type": "string",
                    "enum": ["metric", "imperial"],
                    "description": "Temperature units (default: metric)",
                    "default": "metric"
                }
            }
        })
    }

    fn required_params(&self) -> &[&str] {
        &["location"]
    }

    async fn execute(
        &self,
        arguments: ToolArguments,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let location = arguments
            .get("location")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("'location' must be a string".into()))?;

        let units = arguments
            .get("units")
            .and_then(|v| v.as_str())
            .unwrap_or("metric");
        if units != "metric" && units != "imperial" {
            return Err(ToolError::InvalidArguments(format!(
                "Unknown units '{units}', expected 'metric' or 'imperial'"
            )));
        }

        let weather = generate_mock_weather(location, units);
        match serde_json::to_value(&weather) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(_) => Err(ToolError::ExecutionFailed {
                tool_name: TOOL_NAME.into(),
                reason: "weather report is not an object".into(),
            }),
            Err(e) => Err(ToolError::ExecutionFailed {
                tool_name: TOOL_NAME.into(),
                reason: e.to_string(),
            }),
        }
    }
}

#[derive(Serialize)]
struct WeatherData {
    location: String,
    temperature: f64,
    units: String,
    conditions: String,
    humidity: u32,
    wind_speed: f64,
    wind_direction: String,
}

/// Generate deterministic mock weather based on location name hash.
fn generate_mock_weather(location: &str, units: &str) -> WeatherData {
    let hash: u32 = location
        .to_lowercase()
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));

    let conditions_list = [
        "Clear skies",
        "Partly cloudy",
        "Overcast",
        "Light rain",
        "Heavy rain",
        "Thunderstorms",
        "Snow",
        "Foggy",
    ];

    let wind_dirs = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];

    let base_temp_c = ((hash % 40) as f64) - 5.0; // -5 to 35°C
    let (temperature, unit_label) = if units == "imperial" {
        (base_temp_c * 9.0 / 5.0 + 32.0, "°F")
    } else {
        (base_temp_c, "°C")
    };

    WeatherData {
        location: location.to_string(),
        temperature: (temperature * 10.0).round() / 10.0,
        units: unit_label.to_string(),
        conditions: conditions_list[(hash as usize / 7) % conditions_list.len()].to_string(),
        humidity: 30 + (hash % 60),
        wind_speed: ((hash % 30) as f64) + 5.0,
        wind_direction: wind_dirs[(hash as usize / 3) % wind_dirs.len()].to_string(),
    }
}
