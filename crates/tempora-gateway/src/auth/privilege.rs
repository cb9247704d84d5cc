//! Privilege model: ordered permission levels per resource category.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::AuthError;
use super::grants::GrantCategory;

/// Totally ordered capability rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum PermissionLevel {
    /// View a resource.
    Read = 1,
    /// Manage associations on a resource.
    Manage = 2,
    /// Modify a resource.
    Write = 3,
    /// Full control.
    Admin = 4,
}

impl PermissionLevel {
    /// All levels, lowest first.
    pub const ALL: [Self; 4] = [Self::Read, Self::Manage, Self::Write, Self::Admin];

    /// Integer rank used for comparisons.
    #[must_use]
    pub const fn rank(self) -> u8 {
        self as u8
    }

    /// Level for a rank, if one exists.
    #[must_use]
    pub const fn from_rank(rank: u8) -> Option<Self> {
        match rank {
            1 => Some(Self::Read),
            2 => Some(Self::Manage),
            3 => Some(Self::Write),
            4 => Some(Self::Admin),
            _ => None,
        }
    }

    /// Whether this level meets `required`.
    #[must_use]
    pub const fn satisfies(self, required: Self) -> bool {
        self.rank() >= required.rank()
    }

    /// Uppercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::Manage => "MANAGE",
            Self::Write => "WRITE",
            Self::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionLevel {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "READ" => Ok(Self::Read),
            "MANAGE" => Ok(Self::Manage),
            "WRITE" => Ok(Self::Write),
            "ADMIN" => Ok(Self::Admin),
            _ => Err(AuthError::UnsupportedPermissionLevel(s.to_string())),
        }
    }
}

impl TryFrom<String> for PermissionLevel {
    type Error = AuthError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Resource categories that global privileges apply to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceCategory {
    /// Customer accounts.
    Account,
    /// Projects.
    Project,
    /// Posts.
    Post,
    /// Users and their privileges.
    User,
    /// System configuration.
    Config,
}

impl ResourceCategory {
    /// Every category.
    pub const ALL: [Self; 5] = [
        Self::Account,
        Self::Project,
        Self::Post,
        Self::User,
        Self::Config,
    ];

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Project => "project",
            Self::Post => "post",
            Self::User => "user",
            Self::Config => "config",
        }
    }
}

impl fmt::Display for ResourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceCategory {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "account" => Ok(Self::Account),
            "project" => Ok(Self::Project),
            "post" => Ok(Self::Post),
            "user" => Ok(Self::User),
            "config" => Ok(Self::Config),
            _ => Err(AuthError::UnknownCategory(s.to_string())),
        }
    }
}

/// A global grant of a level on a resource category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Privilege {
    /// Resource category.
    pub category: ResourceCategory,
    /// Granted level.
    pub level: PermissionLevel,
}

impl Privilege {
    /// Create a privilege.
    #[must_use]
    pub const fn new(category: ResourceCategory, level: PermissionLevel) -> Self {
        Self { category, level }
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.level)
    }
}

/// A principal's global privileges, at most one level per category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Privilege>", into = "Vec<Privilege>")]
pub struct PrivilegeSet(BTreeMap<ResourceCategory, PermissionLevel>);

impl PrivilegeSet {
    /// Create an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Add a privilege. A second privilege for the same category keeps the
    /// higher level.
    pub fn insert(&mut self, privilege: Privilege) {
        self.0
            .entry(privilege.category)
            .and_modify(|level| {
                if privilege.level > *level {
                    *level = privilege.level;
                }
            })
            .or_insert(privilege.level);
    }

    /// Replace the level for a category.
    pub fn set(&mut self, category: ResourceCategory, level: PermissionLevel) {
        self.0.insert(category, level);
    }

    /// Remove a category. Returns the level it had.
    pub fn remove(&mut self, category: ResourceCategory) -> Option<PermissionLevel> {
        self.0.remove(&category)
    }

    /// Level granted for a category.
    #[must_use]
    pub fn level_for(&self, category: ResourceCategory) -> Option<PermissionLevel> {
        self.0.get(&category).copied()
    }

    /// Iterate privileges in category order.
    pub fn iter(&self) -> impl Iterator<Item = Privilege> + '_ {
        self.0
            .iter()
            .map(|(category, level)| Privilege::new(*category, *level))
    }

    /// Number of categories granted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing is granted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Privilege> for PrivilegeSet {
    fn from_iter<I: IntoIterator<Item = Privilege>>(iter: I) -> Self {
        let mut set = Self::new();
        for privilege in iter {
            set.insert(privilege);
        }
        set
    }
}

impl From<Vec<Privilege>> for PrivilegeSet {
    fn from(privileges: Vec<Privilege>) -> Self {
        privileges.into_iter().collect()
    }
}

impl From<PrivilegeSet> for Vec<Privilege> {
    fn from(set: PrivilegeSet) -> Self {
        set.iter().collect()
    }
}

/// Parse a level name for a category.
///
/// # Errors
///
/// Returns `UnsupportedPermissionLevel` for unrecognized text.
pub fn required_level_for(
    category: ResourceCategory,
    level_name: &str,
) -> Result<PermissionLevel, AuthError> {
    level_name.parse().map_err(|_| {
        AuthError::UnsupportedPermissionLevel(format!("{level_name} (category {category})"))
    })
}

/// Whether `granted` holds at least `required` on `category`.
#[must_use]
pub fn satisfies(
    granted: &PrivilegeSet,
    category: ResourceCategory,
    required: PermissionLevel,
) -> bool {
    granted
        .level_for(category)
        .is_some_and(|level| level.satisfies(required))
}

/// Per-resource grant an endpoint additionally requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrantRequirement {
    /// Grant table to consult.
    pub category: GrantCategory,
    /// Minimum grant level on the resource.
    pub level: PermissionLevel,
    /// Path parameter holding the resource id.
    pub path_param: &'static str,
}

/// Capability descriptor attached to a route when it is registered.
///
/// The role check gates the operation category; a grant requirement, when
/// present, additionally scopes which instances may be touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capability {
    /// Category the global privilege must cover.
    pub category: ResourceCategory,
    /// Minimum global level.
    pub level: PermissionLevel,
    /// Optional per-resource requirement.
    pub grant: Option<GrantRequirement>,
}

impl Capability {
    /// Require a global privilege only.
    #[must_use]
    pub const fn new(category: ResourceCategory, level: PermissionLevel) -> Self {
        Self {
            category,
            level,
            grant: None,
        }
    }

    /// Additionally require a grant on the resource named by the `id` path
    /// parameter.
    #[must_use]
    pub const fn with_grant(self, category: GrantCategory, level: PermissionLevel) -> Self {
        self.with_grant_param(category, level, "id")
    }

    /// Additionally require a grant on the resource named by `path_param`.
    #[must_use]
    pub const fn with_grant_param(
        mut self,
        category: GrantCategory,
        level: PermissionLevel,
        path_param: &'static str,
    ) -> Self {
        self.grant = Some(GrantRequirement {
            category,
            level,
            path_param,
        });
        self
    }
}
