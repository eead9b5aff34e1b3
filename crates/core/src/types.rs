use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Products sold by the business.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductKind {
    #[serde(rename = "siphon")]
    Siphon,
    #[serde(rename = "jug-6l")]
    Jug6L,
    #[serde(rename = "jug-12l")]
    Jug12L,
}

impl ProductKind {
    pub const ALL: [ProductKind; 3] = [Self::Siphon, Self::Jug6L, Self::Jug12L];

    /// Returns the catalog name stored in the `products` table.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Siphon => "siphon",
            Self::Jug6L => "jug-6l",
            Self::Jug12L => "jug-12l",
        }
    }

    /// Resolves a catalog name, returning `None` for products the ledger does not price.
    pub fn from_catalog_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    /// Container the product is delivered in, when that container must be returned.
    pub fn container(self) -> Option<ContainerKind> {
        match self {
            Self::Siphon => Some(ContainerKind::Siphon),
            Self::Jug12L => Some(ContainerKind::Jug),
            Self::Jug6L => None,
        }
    }
}

/// Returnable containers tracked per client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    Siphon,
    Jug,
}

/// Quantities of each product in a single purchase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItems {
    pub siphons: i64,
    pub jugs_6l: i64,
    pub jugs_12l: i64,
}

impl LineItems {
    pub fn quantity(&self, kind: ProductKind) -> i64 {
        match kind {
            ProductKind::Siphon => self.siphons,
            ProductKind::Jug6L => self.jugs_6l,
            ProductKind::Jug12L => self.jugs_12l,
        }
    }

    /// Units delivered in a returnable container of the given kind.
    pub fn delivered(&self, container: ContainerKind) -> i64 {
        ProductKind::ALL
            .into_iter()
            .filter(|kind| kind.container() == Some(container))
            .map(|kind| self.quantity(kind))
            .sum()
    }
}

/// Containers handed back by the client during a purchase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Returns {
    pub siphons: i64,
    pub jugs: i64,
}

impl Returns {
    pub fn returned(&self, container: ContainerKind) -> i64 {
        match container {
            ContainerKind::Siphon => self.siphons,
            ContainerKind::Jug => self.jugs,
        }
    }
}

/// Aggregate ledger state of a client: running debt and containers held.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientBalance {
    pub debt: i64,
    pub siphons_held: i64,
    pub jugs_held: i64,
}

impl ClientBalance {
    pub fn held(&self, container: ContainerKind) -> i64 {
        match container {
            ContainerKind::Siphon => self.siphons_held,
            ContainerKind::Jug => self.jugs_held,
        }
    }

    pub(crate) fn set_held(&mut self, container: ContainerKind, value: i64) {
        match container {
            ContainerKind::Siphon => self.siphons_held = value,
            ContainerKind::Jug => self.jugs_held = value,
        }
    }
}

/// Ledger account of a customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub debt: i64,
    pub siphons_held: i64,
    pub jugs_held: i64,
    pub created_at: DateTime<Utc>,
}

impl Client {
    pub fn balance(&self) -> ClientBalance {
        ClientBalance {
            debt: self.debt,
            siphons_held: self.siphons_held,
            jugs_held: self.jugs_held,
        }
    }
}

/// The ledger-relevant part of a purchase: what was bought, returned and paid,
/// its priced total and the client's debt right after it was applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseEntry {
    pub items: LineItems,
    pub returns: Returns,
    pub paid: i64,
    pub total: i64,
    pub debt_after: i64,
}

/// Stored purchase record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    pub id: i64,
    pub client_id: i64,
    pub siphons: i64,
    pub jugs_6l: i64,
    pub jugs_12l: i64,
    pub returned_siphons: i64,
    pub returned_jugs: i64,
    pub paid: i64,
    pub total: i64,
    pub debt_after: i64,
    pub purchased_at: DateTime<Utc>,
}

impl Purchase {
    pub fn entry(&self) -> PurchaseEntry {
        PurchaseEntry {
            items: LineItems {
                siphons: self.siphons,
                jugs_6l: self.jugs_6l,
                jugs_12l: self.jugs_12l,
            },
            returns: Returns {
                siphons: self.returned_siphons,
                jugs: self.returned_jugs,
            },
            paid: self.paid,
            total: self.total,
            debt_after: self.debt_after,
        }
    }
}

/// Catalog product with its unit price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price: i64,
    pub stock: i64,
}

/// Authorization role attached to a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Moderator,
    Admin,
}

impl Role {
    /// Returns the canonical database representation for the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Moderator => "MODERATOR",
            Self::Admin => "ADMIN",
        }
    }

    /// Admins and moderators may read billing and stock data.
    pub fn is_staff(self) -> bool {
        matches!(self, Self::Moderator | Self::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "USER" => Ok(Self::User),
            "MODERATOR" => Ok(Self::Moderator),
            "ADMIN" => Ok(Self::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Account allowed to sign in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_names_round_trip_through_product_kind() {
        for kind in ProductKind::ALL {
            assert_eq!(ProductKind::from_catalog_name(kind.as_str()), Some(kind));
        }
        assert_eq!(ProductKind::from_catalog_name("soda-crate"), None);
    }

    #[test]
    fn only_siphons_and_large_jugs_are_returnable() {
        assert_eq!(ProductKind::Siphon.container(), Some(ContainerKind::Siphon));
        assert_eq!(ProductKind::Jug12L.container(), Some(ContainerKind::Jug));
        assert_eq!(ProductKind::Jug6L.container(), None);

        let items = LineItems {
            siphons: 2,
            jugs_6l: 5,
            jugs_12l: 3,
        };
        assert_eq!(items.delivered(ContainerKind::Siphon), 2);
        assert_eq!(items.delivered(ContainerKind::Jug), 3);
    }

    #[test]
    fn role_parses_database_values() {
        assert_eq!("ADMIN".parse::<Role>(), Ok(Role::Admin));
        assert!("root".parse::<Role>().is_err());
        assert!(Role::Moderator.is_staff());
        assert!(!Role::User.is_staff());
    }

    #[test]
    fn product_kind_serializes_catalog_name() {
        let value = serde_json::to_value(ProductKind::Jug6L).expect("serialize");
        assert_eq!(value, serde_json::json!("jug-6l"));
    }
}
