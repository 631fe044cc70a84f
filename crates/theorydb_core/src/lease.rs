//! Distributed leases stored as single rows.
//!
//! A lease row holds a holder token and an expiry in whole Unix seconds.
//! Each operation is one conditional request, so two contenders can never
//! both believe they hold the same key. There is no in-process locking and
//! no internal retry: a caller that loses a race sees `LeaseHeld` or
//! `LeaseNotOwned` and decides for itself.

use std::sync::Arc;

use theorydb_codec::{AttributeValue, Item};
use tracing::debug;

use crate::backend::{
    DeleteItemRequest, NameMap, PutItemRequest, ReturnValues, TableBackend, UpdateItemRequest,
    ValueMap,
};
use crate::error::{CoreError, CoreResult};
use crate::retry::{Clock, SystemClock};

/// Generates holder tokens.
pub type TokenGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Attribute names used by lease rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseConfig {
    /// Partition key attribute.
    pub pk_attr: String,
    /// Sort key attribute.
    pub sk_attr: String,
    /// Holder token attribute.
    pub token_attr: String,
    /// Expiry attribute (Unix seconds).
    pub expires_at_attr: String,
    /// Store-side TTL attribute; `None` disables it.
    pub ttl_attr: Option<String>,
    /// Seconds past expiry before the TTL reaps the row; 0 disables it.
    pub ttl_buffer_seconds: i64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            pk_attr: "pk".to_string(),
            sk_attr: "sk".to_string(),
            token_attr: "lease_token".to_string(),
            expires_at_attr: "lease_expires_at".to_string(),
            ttl_attr: Some("ttl".to_string()),
            ttl_buffer_seconds: 60 * 60,
        }
    }
}

impl LeaseConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the partition key attribute.
    #[must_use]
    pub fn with_pk_attr(mut self, name: impl Into<String>) -> Self {
        self.pk_attr = name.into();
        self
    }

    /// Sets the sort key attribute.
    #[must_use]
    pub fn with_sk_attr(mut self, name: impl Into<String>) -> Self {
        self.sk_attr = name.into();
        self
    }

    /// Sets the token attribute.
    #[must_use]
    pub fn with_token_attr(mut self, name: impl Into<String>) -> Self {
        self.token_attr = name.into();
        self
    }

    /// Sets the expiry attribute.
    #[must_use]
    pub fn with_expires_at_attr(mut self, name: impl Into<String>) -> Self {
        self.expires_at_attr = name.into();
        self
    }

    /// Sets (or with `None`, disables) the TTL attribute.
    #[must_use]
    pub fn with_ttl_attr(mut self, name: Option<String>) -> Self {
        self.ttl_attr = name;
        self
    }

    /// Sets the TTL buffer.
    #[must_use]
    pub fn with_ttl_buffer_seconds(mut self, seconds: i64) -> Self {
        self.ttl_buffer_seconds = seconds;
        self
    }

    fn ttl_attr(&self) -> Option<&str> {
        self.ttl_attr
            .as_deref()
            .filter(|name| !name.is_empty() && self.ttl_buffer_seconds > 0)
    }
}

/// The row a lease lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseKey {
    /// Partition key.
    pub pk: String,
    /// Sort key.
    pub sk: String,
}

impl LeaseKey {
    /// Create a key.
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }

    fn validate(&self, what: &str) -> CoreResult<()> {
        if self.pk.is_empty() || self.sk.is_empty() {
            return Err(CoreError::validation(format!(
                "{what}.pk and {what}.sk are required"
            )));
        }
        Ok(())
    }
}

/// A held lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// The row.
    pub key: LeaseKey,
    /// Holder token written on acquire.
    pub token: String,
    /// Expiry in Unix seconds.
    pub expires_at: i64,
}

impl Lease {
    fn validate(&self) -> CoreResult<()> {
        self.key.validate("lease.key")?;
        if self.token.is_empty() {
            return Err(CoreError::validation("lease.token is required"));
        }
        Ok(())
    }
}

/// Acquires, refreshes and releases leases in one table.
pub struct LeaseManager {
    backend: Arc<dyn TableBackend>,
    table_name: String,
    config: LeaseConfig,
    clock: Arc<dyn Clock>,
    token: TokenGenerator,
}

impl LeaseManager {
    /// A manager over `table_name` with default attribute names, the system
    /// clock and random v4 UUID tokens.
    pub fn new(backend: Arc<dyn TableBackend>, table_name: impl Into<String>) -> CoreResult<Self> {
        let table_name = table_name.into();
        if table_name.is_empty() {
            return Err(CoreError::validation("table_name is required"));
        }
        Ok(Self {
            backend,
            table_name,
            config: LeaseConfig::default(),
            clock: Arc::new(SystemClock),
            token: Arc::new(|| uuid::Uuid::new_v4().to_string()),
        })
    }

    /// Use different attribute names.
    #[must_use]
    pub fn with_config(mut self, config: LeaseConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a different clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use a different token generator.
    #[must_use]
    pub fn with_token_generator(mut self, token: TokenGenerator) -> Self {
        self.token = token;
        self
    }

    /// The attribute configuration.
    pub fn config(&self) -> &LeaseConfig {
        &self.config
    }

    /// The conventional key for a lock on `pk`: sort key `LOCK`.
    pub fn lock_key(&self, pk: impl Into<String>) -> LeaseKey {
        LeaseKey::new(pk, "LOCK")
    }

    /// Take the lease if nobody holds it or the current holder's lease
    /// has expired.
    ///
    /// # Errors
    ///
    /// `LeaseHeld` while another holder's lease is live.
    pub fn acquire(&self, key: &LeaseKey, lease_seconds: i64) -> CoreResult<Lease> {
        key.validate("key")?;
        check_duration(lease_seconds)?;

        let now = self.now();
        let expires_at = now + lease_seconds;
        let token = (self.token)();

        let mut item = self.key_item(key);
        item.insert(self.config.token_attr.clone(), AttributeValue::from(token.as_str()));
        item.insert(
            self.config.expires_at_attr.clone(),
            AttributeValue::number(expires_at),
        );
        if let Some(ttl_attr) = self.config.ttl_attr() {
            item.insert(
                ttl_attr.to_string(),
                AttributeValue::number(expires_at + self.config.ttl_buffer_seconds),
            );
        }

        let request = PutItemRequest {
            table_name: self.table_name.clone(),
            item,
            condition_expression: Some("attribute_not_exists(#pk) OR #exp <= :now".to_string()),
            expression_attribute_names: NameMap::from([
                ("#pk".to_string(), self.config.pk_attr.clone()),
                ("#exp".to_string(), self.config.expires_at_attr.clone()),
            ]),
            expression_attribute_values: ValueMap::from([(
                ":now".to_string(),
                AttributeValue::number(now),
            )]),
        };
        debug!(table = %self.table_name, pk = %key.pk, sk = %key.sk, "acquiring lease");

        match self.backend.put_item(&request).map_err(CoreError::from) {
            Ok(()) => Ok(Lease {
                key: key.clone(),
                token,
                expires_at,
            }),
            Err(CoreError::ConditionFailed { .. }) => Err(CoreError::LeaseHeld),
            Err(err) => Err(err),
        }
    }

    /// Extend a live lease to `now + lease_seconds`.
    ///
    /// # Errors
    ///
    /// `LeaseNotOwned` if the token no longer matches or the lease expired.
    pub fn refresh(&self, lease: &Lease, lease_seconds: i64) -> CoreResult<Lease> {
        lease.validate()?;
        check_duration(lease_seconds)?;

        let now = self.now();
        let expires_at = now + lease_seconds;

        let mut names = NameMap::from([
            ("#tok".to_string(), self.config.token_attr.clone()),
            ("#exp".to_string(), self.config.expires_at_attr.clone()),
        ]);
        let mut values = ValueMap::from([
            (":tok".to_string(), AttributeValue::from(lease.token.as_str())),
            (":now".to_string(), AttributeValue::number(now)),
            (":exp".to_string(), AttributeValue::number(expires_at)),
        ]);
        let mut update_expression = "SET #exp = :exp".to_string();
        if let Some(ttl_attr) = self.config.ttl_attr() {
            names.insert("#ttl".to_string(), ttl_attr.to_string());
            values.insert(
                ":ttl".to_string(),
                AttributeValue::number(expires_at + self.config.ttl_buffer_seconds),
            );
            update_expression.push_str(", #ttl = :ttl");
        }

        let request = UpdateItemRequest {
            table_name: self.table_name.clone(),
            key: self.key_item(&lease.key),
            update_expression,
            condition_expression: Some("#tok = :tok AND #exp > :now".to_string()),
            expression_attribute_names: names,
            expression_attribute_values: values,
            return_values: ReturnValues::None,
        };
        debug!(table = %self.table_name, pk = %lease.key.pk, sk = %lease.key.sk, "refreshing lease");

        match self.backend.update_item(&request).map_err(CoreError::from) {
            Ok(_) => Ok(Lease {
                key: lease.key.clone(),
                token: lease.token.clone(),
                expires_at,
            }),
            Err(CoreError::ConditionFailed { .. }) => Err(CoreError::LeaseNotOwned),
            Err(err) => Err(err),
        }
    }

    /// Delete the lease row if this holder still owns it.
    ///
    /// Returns `false` when the row was already gone or taken over.
    pub fn release(&self, lease: &Lease) -> CoreResult<bool> {
        lease.validate()?;

        let request = DeleteItemRequest {
            table_name: self.table_name.clone(),
            key: self.key_item(&lease.key),
            condition_expression: Some("#tok = :tok".to_string()),
            expression_attribute_names: NameMap::from([(
                "#tok".to_string(),
                self.config.token_attr.clone(),
            )]),
            expression_attribute_values: ValueMap::from([(
                ":tok".to_string(),
                AttributeValue::from(lease.token.as_str()),
            )]),
        };
        debug!(table = %self.table_name, pk = %lease.key.pk, sk = %lease.key.sk, "releasing lease");

        match self.backend.delete_item(&request).map_err(CoreError::from) {
            Ok(()) => Ok(true),
            Err(CoreError::ConditionFailed { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn now(&self) -> i64 {
        self.clock.now_unix().floor() as i64
    }

    fn key_item(&self, key: &LeaseKey) -> Item {
        Item::from([
            (self.config.pk_attr.clone(), AttributeValue::from(key.pk.as_str())),
            (self.config.sk_attr.clone(), AttributeValue::from(key.sk.as_str())),
        ])
    }
}

impl std::fmt::Debug for LeaseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseManager")
            .field("table_name", &self.table_name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn check_duration(lease_seconds: i64) -> CoreResult<()> {
    if lease_seconds <= 0 {
        return Err(CoreError::validation("lease_seconds must be > 0"));
    }
    Ok(())
}
