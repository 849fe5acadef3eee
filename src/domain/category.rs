//! User-defined triage categories.

use serde::{Deserialize, Serialize};

use super::{CategoryId, UserId};

/// A category a user has defined for incoming mail.
///
/// The name and description are sent verbatim to the classification model,
/// so they double as the prompt-side definition of the category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    /// Unique identifier.
    pub id: CategoryId,
    /// Owning user.
    pub user_id: UserId,
    /// Short display name, e.g. "Newsletters".
    pub name: String,
    /// Free-form description of what belongs in this category.
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_round_trips_through_json() {
        let category = Category {
            id: CategoryId::from("cat-1"),
            user_id: UserId::from("user-1"),
            name: "Receipts".to_string(),
            description: "Order confirmations and invoices".to_string(),
        };

        let json = serde_json::to_string(&category).unwrap();
        let back: Category = serde_json::from_str(&json).unwrap();
        assert_eq!(back, category);
    }
}
