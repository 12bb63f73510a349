//! Core types for the registration store.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::hash_map::{self, HashMap};
use std::fmt;

/// Identifier of a chat-platform user.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberKey(pub String);

impl SubscriberKey {
    pub fn new(key: impl Into<String>) -> Self {
        SubscriberKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SubscriberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriberKey({})", self.0)
    }
}

impl fmt::Display for SubscriberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SubscriberKey {
    fn from(s: &str) -> Self {
        SubscriberKey(s.to_string())
    }
}

impl From<String> for SubscriberKey {
    fn from(s: String) -> Self {
        SubscriberKey(s)
    }
}

impl Borrow<str> for SubscriberKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Opaque token for a notification already delivered to a subscriber.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(pub String);

impl NotificationId {
    pub fn new(id: impl Into<String>) -> Self {
        NotificationId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NotificationId({})", self.0)
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NotificationId {
    fn from(s: &str) -> Self {
        NotificationId(s.to_string())
    }
}

impl From<String> for NotificationId {
    fn from(s: String) -> Self {
        NotificationId(s)
    }
}

/// Identity of the linked GitHub account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBinding {
    /// Login name on the linked service.
    pub login: String,
    /// Profile page.
    pub html_url: String,
    /// Avatar image.
    pub avatar_url: String,
}

impl AccountBinding {
    pub fn new(
        login: impl Into<String>,
        html_url: impl Into<String>,
        avatar_url: impl Into<String>,
    ) -> Self {
        Self {
            login: login.into(),
            html_url: html_url.into(),
            avatar_url: avatar_url.into(),
        }
    }
}

/// A registered subscriber: account binding plus delivered notifications.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberRecord {
    #[serde(flatten)]
    pub binding: AccountBinding,
    /// Notifications currently considered delivered, in caller order.
    pub current_notification_ids: Vec<NotificationId>,
}

impl SubscriberRecord {
    /// A freshly registered subscriber with no delivered notifications.
    pub fn new(binding: AccountBinding) -> Self {
        Self {
            binding,
            current_notification_ids: Vec::new(),
        }
    }
}

/// Mapping from subscriber key to record. This is the whole persisted state.
///
/// Every value is owned, so [`Clone`] produces a fully independent copy.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Registrations(HashMap<SubscriberKey, SubscriberRecord>);

impl Registrations {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    /// Copy of this mapping that shares nothing with it.
    pub fn deep_copy(&self) -> Self {
        self.clone()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&SubscriberRecord> {
        self.0.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut SubscriberRecord> {
        self.0.get_mut(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Insert or replace a record, returning the previous one.
    pub fn insert(
        &mut self,
        key: SubscriberKey,
        record: SubscriberRecord,
    ) -> Option<SubscriberRecord> {
        self.0.insert(key, record)
    }

    pub fn remove(&mut self, key: &str) -> Option<SubscriberRecord> {
        self.0.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &SubscriberKey> {
        self.0.keys()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, SubscriberKey, SubscriberRecord> {
        self.0.iter()
    }
}

impl FromIterator<(SubscriberKey, SubscriberRecord)> for Registrations {
    fn from_iter<I: IntoIterator<Item = (SubscriberKey, SubscriberRecord)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Registrations {
    type Item = (SubscriberKey, SubscriberRecord);
    type IntoIter = hash_map::IntoIter<SubscriberKey, SubscriberRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Registrations {
    type Item = (&'a SubscriberKey, &'a SubscriberRecord);
    type IntoIter = hash_map::Iter<'a, SubscriberKey, SubscriberRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// On-disk envelope: `{ "users": { ... } }`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UsersFile {
    pub users: Registrations,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn andy() -> AccountBinding {
        AccountBinding::new(
            "Andy",
            "https://github.com/andy",
            "https://github.com/andy.png",
        )
    }

    #[test]
    fn test_deep_copy_is_independent() {
        let mut users = Registrations::new();
        users.insert("u1".into(), SubscriberRecord::new(andy()));

        let mut copy = users.deep_copy();
        copy.get_mut("u1")
            .unwrap()
            .current_notification_ids
            .push("n1".into());
        copy.get_mut("u1").unwrap().binding.login = "Mallory".to_string();
        copy.insert("u2".into(), SubscriberRecord::new(andy()));

        let original = users.get("u1").unwrap();
        assert!(original.current_notification_ids.is_empty());
        assert_eq!(original.binding.login, "Andy");
        assert_eq!(users.len(), 1);
    }

    #[test]
    fn test_id_newtypes_share_helpers() {
        let key = SubscriberKey::new("u1");
        let id = NotificationId::new(String::from("n1"));

        assert_eq!(key.as_str(), "u1");
        assert_eq!(id.as_str(), "n1");
        assert_eq!(id, NotificationId::from("n1"));
        assert_eq!(id.to_string(), "n1");
    }

    #[test]
    fn test_deep_copy_empty() {
        let users = Registrations::new();
        assert!(users.deep_copy().is_empty());
    }

    #[test]
    fn test_record_json_shape() {
        let mut record = SubscriberRecord::new(andy());
        record.current_notification_ids = vec!["n1".into(), "n2".into()];

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "login": "Andy",
                "htmlUrl": "https://github.com/andy",
                "avatarUrl": "https://github.com/andy.png",
                "currentNotificationIds": ["n1", "n2"],
            })
        );
    }

    #[test]
    fn test_envelope_requires_users_field() {
        let result: std::result::Result<UsersFile, _> = serde_json::from_str(r#"{"people": {}}"#);
        assert!(result.is_err());

        let parsed: UsersFile = serde_json::from_str(r#"{"users": {}}"#).unwrap();
        assert!(parsed.users.is_empty());
    }

    #[test]
    fn test_record_missing_notification_ids_is_rejected() {
        let json = r#"{"users": {"u1": {"login": "Andy", "htmlUrl": "h", "avatarUrl": "a"}}}"#;
        let result: std::result::Result<UsersFile, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
