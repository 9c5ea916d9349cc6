//! Grant vocabulary: the fixed module and action enumerations and the
//! `(role, module, action)` tuple that is the unit of authorization.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use keystone_core::DomainError;

use crate::Role;

/// Business area a grant applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    Parts,
    WorkOrders,
    Vendors,
    Inventory,
    Quotes,
    Customers,
    PurchaseOrders,
    Invoices,
    Assets,
    Locations,
    Maintenance,
    Projects,
    Reports,
    Documents,
    Shipping,
    Receiving,
    Labor,
    Categories,
    Admin,
}

impl Module {
    pub const ALL: [Module; 19] = [
        Module::Parts,
        Module::WorkOrders,
        Module::Vendors,
        Module::Inventory,
        Module::Quotes,
        Module::Customers,
        Module::PurchaseOrders,
        Module::Invoices,
        Module::Assets,
        Module::Locations,
        Module::Maintenance,
        Module::Projects,
        Module::Reports,
        Module::Documents,
        Module::Shipping,
        Module::Receiving,
        Module::Labor,
        Module::Categories,
        Module::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Module::Parts => "parts",
            Module::WorkOrders => "work_orders",
            Module::Vendors => "vendors",
            Module::Inventory => "inventory",
            Module::Quotes => "quotes",
            Module::Customers => "customers",
            Module::PurchaseOrders => "purchase_orders",
            Module::Invoices => "invoices",
            Module::Assets => "assets",
            Module::Locations => "locations",
            Module::Maintenance => "maintenance",
            Module::Projects => "projects",
            Module::Reports => "reports",
            Module::Documents => "documents",
            Module::Shipping => "shipping",
            Module::Receiving => "receiving",
            Module::Labor => "labor",
            Module::Categories => "categories",
            Module::Admin => "admin",
        }
    }
}

impl core::fmt::Display for Module {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Module {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Module::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown module '{s}'")))
    }
}

/// Operation a grant permits within a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    View,
    Create,
    Edit,
    Delete,
    Approve,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::View,
        Action::Create,
        Action::Edit,
        Action::Delete,
        Action::Approve,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Create => "create",
            Action::Edit => "edit",
            Action::Delete => "delete",
            Action::Approve => "approve",
        }
    }
}

impl core::fmt::Display for Action {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown action '{s}'")))
    }
}

/// A single grant: `role` may perform `action` within `module`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PermissionEntry {
    pub role: Role,
    pub module: Module,
    pub action: Action,
}

impl PermissionEntry {
    pub fn new(role: Role, module: Module, action: Action) -> Self {
        Self { role, module, action }
    }
}

/// Grants seeded into an empty grant table.
///
/// - `admin`: every module × action
/// - `user`: every module × action except the admin module
/// - `readonly`: view on every module
pub fn default_grants() -> Vec<PermissionEntry> {
    let mut grants = Vec::new();
    for module in Module::ALL {
        for action in Action::ALL {
            grants.push(PermissionEntry::new(Role::ADMIN, module, action));
            if module != Module::Admin {
                grants.push(PermissionEntry::new(Role::USER, module, action));
            }
        }
        grants.push(PermissionEntry::new(Role::READONLY, module, Action::View));
    }
    grants
}
