//! Field Catalog
//!
//! Closed, per-entity vocabulary of filterable and sortable fields. Each
//! descriptor says how the field is read in SQL and in the graph pattern.

use serde::Serialize;

use crate::engine::error::{QueryError, QueryResult};

use super::request::FieldKey;
use super::{EntityKind, FilterOperator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Uuid,
    Text,
    Decimal,
    Integer,
}

/// Relationship direction relative to the matched node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// Where a field lives in the graph pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphField {
    Property { alias: &'static str, key: &'static str },
    /// FOLLOWS edges counted on the matched user
    Degree { alias: &'static str, direction: Direction },
    /// Product of two properties, computed at read time
    Product {
        left: (&'static str, &'static str),
        right: (&'static str, &'static str),
    },
}

#[derive(Debug, PartialEq)]
pub struct FieldDescriptor {
    pub entity: EntityKind,
    pub ordinal: u32,
    /// Enum name, e.g. `FollowersCount`
    pub name: &'static str,
    /// Canonical output key, e.g. `followersCount`
    pub output: &'static str,
    /// Result column label in SQL, e.g. `followers_count`
    pub sql_name: &'static str,
    pub value_type: ValueType,
    /// SQL expression over the entity's FROM clause
    pub column: &'static str,
    pub graph: GraphField,
    pub aggregate: bool,
}

impl FieldDescriptor {
    pub fn supports(&self, op: FilterOperator) -> bool {
        match self.value_type {
            ValueType::Uuid => matches!(op, FilterOperator::Equals | FilterOperator::In),
            ValueType::Text => true,
            ValueType::Decimal | ValueType::Integer => op != FilterOperator::Like,
        }
    }

    fn matches_name(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
            || self.output.eq_ignore_ascii_case(name)
            || self.sql_name.eq_ignore_ascii_case(name)
    }
}

const fn prop(alias: &'static str, key: &'static str) -> GraphField {
    GraphField::Property { alias, key }
}

static ARTICLE_FIELDS: [FieldDescriptor; 3] = [
    FieldDescriptor {
        entity: EntityKind::Articles,
        ordinal: 0,
        name: "Id",
        output: "id",
        sql_name: "id",
        value_type: ValueType::Uuid,
        column: "a.id",
        graph: prop("a", "id"),
        aggregate: false,
    },
    FieldDescriptor {
        entity: EntityKind::Articles,
        ordinal: 1,
        name: "Name",
        output: "name",
        sql_name: "name",
        value_type: ValueType::Text,
        column: "a.name",
        graph: prop("a", "name"),
        aggregate: false,
    },
    FieldDescriptor {
        entity: EntityKind::Articles,
        ordinal: 2,
        name: "Price",
        output: "price",
        sql_name: "price",
        value_type: ValueType::Decimal,
        column: "a.price",
        graph: prop("a", "price"),
        aggregate: false,
    },
];

static USER_FIELDS: [FieldDescriptor; 5] = [
    FieldDescriptor {
        entity: EntityKind::Users,
        ordinal: 0,
        name: "Id",
        output: "id",
        sql_name: "id",
        value_type: ValueType::Uuid,
        column: "u.id",
        graph: prop("u", "id"),
        aggregate: false,
    },
    FieldDescriptor {
        entity: EntityKind::Users,
        ordinal: 1,
        name: "UserName",
        output: "userName",
        sql_name: "user_name",
        value_type: ValueType::Text,
        column: "u.name",
        graph: prop("u", "name"),
        aggregate: false,
    },
    FieldDescriptor {
        entity: EntityKind::Users,
        ordinal: 2,
        name: "Email",
        output: "email",
        sql_name: "email",
        value_type: ValueType::Text,
        column: "u.email",
        graph: prop("u", "email"),
        aggregate: false,
    },
    FieldDescriptor {
        entity: EntityKind::Users,
        ordinal: 3,
        name: "FollowersCount",
        output: "followersCount",
        sql_name: "followers_count",
        value_type: ValueType::Integer,
        column: "(SELECT COUNT(*) FROM user_follows f WHERE f.following_id = u.id)",
        graph: GraphField::Degree {
            alias: "u",
            direction: Direction::Incoming,
        },
        aggregate: true,
    },
    FieldDescriptor {
        entity: EntityKind::Users,
        ordinal: 4,
        name: "FollowingCount",
        output: "followingCount",
        sql_name: "following_count",
        value_type: ValueType::Integer,
        column: "(SELECT COUNT(*) FROM user_follows f WHERE f.follower_id = u.id)",
        graph: GraphField::Degree {
            alias: "u",
            direction: Direction::Outgoing,
        },
        aggregate: true,
    },
];

static ORDER_FIELDS: [FieldDescriptor; 5] = [
    FieldDescriptor {
        entity: EntityKind::Orders,
        ordinal: 0,
        name: "Id",
        output: "id",
        sql_name: "id",
        value_type: ValueType::Uuid,
        column: "o.id",
        graph: prop("r", "id"),
        aggregate: false,
    },
    FieldDescriptor {
        entity: EntityKind::Orders,
        ordinal: 1,
        name: "UserId",
        output: "userId",
        sql_name: "user_id",
        value_type: ValueType::Uuid,
        column: "o.user_id",
        graph: prop("u", "id"),
        aggregate: false,
    },
    FieldDescriptor {
        entity: EntityKind::Orders,
        ordinal: 2,
        name: "ArticleId",
        output: "articleId",
        sql_name: "article_id",
        value_type: ValueType::Uuid,
        column: "o.article_id",
        graph: prop("a", "id"),
        aggregate: false,
    },
    FieldDescriptor {
        entity: EntityKind::Orders,
        ordinal: 3,
        name: "Quantity",
        output: "quantity",
        sql_name: "quantity",
        value_type: ValueType::Integer,
        column: "o.quantity",
        graph: prop("r", "quantity"),
        aggregate: false,
    },
    FieldDescriptor {
        entity: EntityKind::Orders,
        ordinal: 4,
        name: "TotalPrice",
        output: "totalPrice",
        sql_name: "total_price",
        value_type: ValueType::Decimal,
        column: "(o.quantity * oa.price)",
        graph: GraphField::Product {
            left: ("r", "quantity"),
            right: ("a", "price"),
        },
        aggregate: true,
    },
];

/// All fields of an entity, in ordinal order
pub fn fields(entity: EntityKind) -> &'static [FieldDescriptor] {
    match entity {
        EntityKind::Articles => &ARTICLE_FIELDS,
        EntityKind::Users => &USER_FIELDS,
        EntityKind::Orders => &ORDER_FIELDS,
    }
}

/// The primary key field, used as the default sort and as tie-break
pub fn id_field(entity: EntityKind) -> &'static FieldDescriptor {
    &fields(entity)[0]
}

/// Look up a filter field. Anything outside the entity's set is `UnknownField`.
pub fn resolve(entity: EntityKind, key: &FieldKey) -> QueryResult<&'static FieldDescriptor> {
    let found = match key {
        FieldKey::Index(i) => fields(entity).get(*i as usize),
        FieldKey::Name(name) => fields(entity).iter().find(|f| f.matches_name(name.trim())),
    };
    found.ok_or_else(|| QueryError::UnknownField {
        entity,
        field: key.to_string(),
    })
}

/// Look up a sort field. Unrecognized keys yield `None` and the caller
/// falls back to id descending.
pub fn resolve_sort(entity: EntityKind, key: &FieldKey) -> Option<&'static FieldDescriptor> {
    resolve(entity, key).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(EntityKind::Users, FieldKey::Index(3), "FollowersCount")]
    #[test_case(EntityKind::Users, FieldKey::Name("userName".into()), "UserName")]
    #[test_case(EntityKind::Orders, FieldKey::Name("TOTALPRICE".into()), "TotalPrice")]
    #[test_case(EntityKind::Orders, FieldKey::Name("article_id".into()), "ArticleId")]
    #[test_case(EntityKind::Articles, FieldKey::Index(2), "Price")]
    fn test_resolve(entity: EntityKind, key: FieldKey, expected: &str) {
        assert_eq!(resolve(entity, &key).unwrap().name, expected);
    }

    #[test]
    fn test_unknown_field() {
        let err = resolve(EntityKind::Articles, &FieldKey::Index(7)).unwrap_err();
        assert_eq!(err.kind(), "UnknownField");
        let err = resolve(EntityKind::Users, &FieldKey::Name("Price".into())).unwrap_err();
        assert_eq!(err.kind(), "UnknownField");
    }

    #[test]
    fn test_ordinals_match_positions() {
        for entity in EntityKind::ALL {
            for (i, field) in fields(entity).iter().enumerate() {
                assert_eq!(field.ordinal as usize, i);
                assert_eq!(field.entity, entity);
            }
            assert_eq!(id_field(entity).name, "Id");
        }
    }

    #[test]
    fn test_operator_support() {
        let id = id_field(EntityKind::Users);
        assert!(id.supports(FilterOperator::Equals));
        assert!(id.supports(FilterOperator::In));
        assert!(!id.supports(FilterOperator::GreaterThan));

        let price = &fields(EntityKind::Articles)[2];
        assert!(price.supports(FilterOperator::LessThanOrEqual));
        assert!(!price.supports(FilterOperator::Like));

        let email = &fields(EntityKind::Users)[2];
        assert!(FilterOperator::ALL.iter().all(|op| email.supports(*op)));
    }
}
