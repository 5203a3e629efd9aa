use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// One message in the conversation. Field names match the persisted blob.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    pub id: Uuid,
    pub content: String,
    pub is_from_user: bool,
    pub timestamp: DateTime<Utc>,
    // Raw JPEG bytes, base64 in the blob
    #[serde(
        rename = "imageData",
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_bytes"
    )]
    pub image_bytes: Option<Vec<u8>>,
}

impl ConversationTurn {
    pub fn new(content: impl Into<String>, is_from_user: bool, image_bytes: Option<Vec<u8>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            is_from_user,
            timestamp: Utc::now(),
            image_bytes,
        }
    }

    pub fn user(content: impl Into<String>, image_bytes: Option<Vec<u8>>) -> Self {
        Self::new(content, true, image_bytes)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(content, false, None)
    }

    pub fn has_image(&self) -> bool {
        self.image_bytes.is_some()
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Profile fields used to personalize replies. Supplied by the profile store;
/// the chat core only reads it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct UserContext {
    pub name: String,
    pub age: u32,
    pub height: f64, // cm
    pub weight: f64, // kg
    pub activity_level: String,
    pub dietary_restrictions: Vec<String>,
    pub health_goals: Vec<String>,
    pub allergies: String,
    pub preferred_cuisines: String,
    pub cooking_skill_level: String,
    pub budget_range: String,
}

impl Default for UserContext {
    fn default() -> Self {
        Self {
            name: String::new(),
            age: 0,
            height: 0.0,
            weight: 0.0,
            activity_level: "moderate".to_string(),
            dietary_restrictions: Vec::new(),
            health_goals: Vec::new(),
            allergies: String::new(),
            preferred_cuisines: String::new(),
            cooking_skill_level: "beginner".to_string(),
            budget_range: "medium".to_string(),
        }
    }
}

impl UserContext {
    pub fn is_complete(&self) -> bool {
        !self.name.trim().is_empty() && self.age > 0 && !self.health_goals.is_empty()
    }

    /// Renders the profile as the text preamble sent ahead of the user's message.
    pub fn context_string(&self) -> String {
        let mut lines = Vec::new();

        if !self.name.is_empty() {
            lines.push(format!("Name: {}", self.name));
        }
        if self.age > 0 {
            lines.push(format!("Age: {}", self.age));
        }
        if self.height > 0.0 {
            lines.push(format!("Height: {} cm", self.height));
        }
        if self.weight > 0.0 {
            lines.push(format!("Weight: {} kg", self.weight));
        }
        lines.push(format!("Activity Level: {}", self.activity_level));
        if !self.health_goals.is_empty() {
            lines.push(format!("Health Goals: {}", self.health_goals.join(", ")));
        }
        if !self.dietary_restrictions.is_empty() {
            lines.push(format!(
                "Dietary Restrictions: {}",
                self.dietary_restrictions.join(", ")
            ));
        }
        if !self.allergies.is_empty() {
            lines.push(format!("Allergies: {}", self.allergies));
        }
        if !self.preferred_cuisines.is_empty() {
            lines.push(format!("Preferred Cuisines: {}", self.preferred_cuisines));
        }
        lines.push(format!("Cooking Skill: {}", self.cooking_skill_level));
        lines.push(format!("Budget Range: {}", self.budget_range));

        let mut context = lines.join("\n");
        context.push('\n');
        context
    }

    /// The preamble to attach to outbound requests, only for a complete profile.
    pub fn preamble(&self) -> Option<String> {
        self.is_complete().then(|| self.context_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_profile() -> UserContext {
        UserContext {
            name: "Sam".to_string(),
            age: 31,
            height: 172.5,
            health_goals: vec!["Lose weight".to_string(), "More protein".to_string()],
            allergies: "peanuts".to_string(),
            ..UserContext::default()
        }
    }

    #[test]
    fn test_completeness_rules() {
        assert!(complete_profile().is_complete());

        let mut blank_name = complete_profile();
        blank_name.name = "   ".to_string();
        assert!(!blank_name.is_complete());

        let mut no_age = complete_profile();
        no_age.age = 0;
        assert!(!no_age.is_complete());

        let mut no_goals = complete_profile();
        no_goals.health_goals.clear();
        assert!(!no_goals.is_complete());
        assert!(no_goals.preamble().is_none());
    }

    #[test]
    fn test_context_string_skips_unset_fields() {
        let context = complete_profile().context_string();
        assert_eq!(
            context,
            "Name: Sam\n\
             Age: 31\n\
             Height: 172.5 cm\n\
             Activity Level: moderate\n\
             Health Goals: Lose weight, More protein\n\
             Allergies: peanuts\n\
             Cooking Skill: beginner\n\
             Budget Range: medium\n"
        );
    }

    #[test]
    fn test_turn_serializes_with_blob_field_names() {
        let turn = ConversationTurn::user("hi", Some(vec![0xFF, 0xD8, 0xFF]));
        let value = serde_json::to_value(&turn).unwrap();
        assert_eq!(value["isFromUser"], true);
        assert_eq!(value["imageData"], "/9j/");
        assert!(value.get("imageBytes").is_none());

        let text_only = serde_json::to_value(ConversationTurn::assistant("ok")).unwrap();
        assert!(text_only.get("imageData").is_none());
    }

    #[test]
    fn test_turn_timestamp_survives_serialization() {
        let turn = ConversationTurn::user("precise", None);
        let json = serde_json::to_string(&turn).unwrap();
        let back: ConversationTurn = serde_json::from_str(&json).unwrap();
        assert_eq!(back, turn);
    }

    #[test]
    fn test_partial_profile_json_uses_defaults() {
        let profile: UserContext = serde_json::from_str(r#"{"name":"Ana","age":40}"#).unwrap();
        assert_eq!(profile.name, "Ana");
        assert_eq!(profile.cooking_skill_level, "beginner");
        assert!(!profile.is_complete());
    }
}
