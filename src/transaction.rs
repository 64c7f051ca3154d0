use serde::{Deserialize, Serialize};

/// A recorded movement of `amount` units of `resource` between two habitat
/// subsystems. Sign and unit of `amount` are up to the caller.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Transaction {
    pub timestamp: f64,
    pub resource: String,
    pub amount: f64,
    pub source: String,
    pub destination: String,
}

impl Transaction {
    pub fn new(
        timestamp: f64,
        resource: String,
        amount: f64,
        source: String,
        destination: String,
    ) -> Self {
        Self {
            timestamp,
            resource,
            amount,
            source,
            destination,
        }
    }
}

/// Caller input for a new transaction. Every field may be missing; the ledger
/// reports incomplete requests instead of failing on them.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TransactionRequest {
    pub resource: Option<String>,
    pub amount: Option<f64>,
    pub source: Option<String>,
    pub destination: Option<String>,
}

impl TransactionRequest {
    #[cfg(test)]
    pub fn new(resource: &str, amount: f64, source: &str, destination: &str) -> Self {
        Self {
            resource: Some(resource.to_string()),
            amount: Some(amount),
            source: Some(source.to_string()),
            destination: Some(destination.to_string()),
        }
    }

    /// Names of the fields that are absent or unusable. An empty resource counts
    /// as absent. NaN and infinite amounts are refused: JSON has no encoding for
    /// them, so they would all hash the same.
    pub fn invalid_fields(&self) -> Vec<&'static str> {
        let mut invalid = Vec::new();
        if self.resource.as_deref().map_or(true, str::is_empty) {
            invalid.push("resource");
        }
        if !self.amount.map_or(false, f64::is_finite) {
            invalid.push("amount");
        }
        if self.source.is_none() {
            invalid.push("source");
        }
        if self.destination.is_none() {
            invalid.push("destination");
        }
        invalid
    }

    /// Stamp the request into a transaction, or `None` if any field is invalid.
    pub fn into_transaction(self, timestamp: f64) -> Option<Transaction> {
        if !self.invalid_fields().is_empty() {
            return None;
        }
        match self {
            TransactionRequest {
                resource: Some(resource),
                amount: Some(amount),
                source: Some(source),
                destination: Some(destination),
            } => Some(Transaction::new(timestamp, resource, amount, source, destination)),
            _ => None,
        }
    }
}
