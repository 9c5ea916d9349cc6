//! Pure mapping from API paths to the permission they require.
//!
//! Paths here are *API-relative*: `/api/v1/parts/123/approve` is seen as
//! `parts/123/approve`. Use [`api_relative_path`] to derive one.

use serde::Serialize;

use crate::{Action, Module};

/// Grant required to call an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RequiredPermission {
    pub module: Module,
    pub action: Action,
}

/// First path segments that need no grant at all.
const PASSTHROUGH_SEGMENTS: &[&str] = &[
    "dashboard",
    "search",
    "audit",
    "calendar",
    "undo",
    "notifications",
    "config",
    "attachments",
    "me",
    "csrf-token",
    "account",
    "health",
];

/// First path segments reserved for the admin role regardless of grants.
const ADMIN_ONLY_SEGMENTS: &[&str] = &["users", "apikeys", "email"];

/// Strip `/api/v1/` (or bare `/api/`) from a request path.
///
/// Returns `None` for anything outside the API namespace.
pub fn api_relative_path(path: &str) -> Option<&str> {
    if let Some(rest) = path.strip_prefix("/api/v1/") {
        return Some(rest);
    }
    if path == "/api/v1" || path == "/api" {
        return Some("");
    }
    path.strip_prefix("/api/")
}

fn segments(api_path: &str) -> Vec<&str> {
    api_path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect()
}

fn module_for_segment(segment: &str) -> Option<Module> {
    let module = match segment {
        "parts" => Module::Parts,
        "workorders" | "work-orders" => Module::WorkOrders,
        "vendors" => Module::Vendors,
        "inventory" => Module::Inventory,
        "quotes" => Module::Quotes,
        "customers" => Module::Customers,
        "purchase-orders" | "purchaseorders" => Module::PurchaseOrders,
        "invoices" => Module::Invoices,
        "assets" => Module::Assets,
        "locations" => Module::Locations,
        "maintenance" | "pm-schedules" => Module::Maintenance,
        "projects" => Module::Projects,
        "reports" => Module::Reports,
        "documents" => Module::Documents,
        "shipments" | "shipping" => Module::Shipping,
        "receiving" => Module::Receiving,
        "labor" | "timesheets" => Module::Labor,
        "categories" => Module::Categories,
        "users" | "apikeys" | "roles" | "settings" | "email" => Module::Admin,
        _ => return None,
    };
    Some(module)
}

fn action_for_method(method: &str) -> Action {
    match method.to_ascii_uppercase().as_str() {
        "POST" => Action::Create,
        "PUT" | "PATCH" => Action::Edit,
        "DELETE" => Action::Delete,
        _ => Action::View,
    }
}

/// Map `(api_path, method)` to the grant it requires.
///
/// `None` means the path is an operational/utility endpoint that needs no
/// grant. Unknown first segments require the admin module, so a business
/// route added without a table entry is closed rather than open.
pub fn required_permission(api_path: &str, method: &str) -> Option<RequiredPermission> {
    let segs = segments(api_path);
    let first = *segs.first()?;

    if PASSTHROUGH_SEGMENTS.contains(&first) {
        return None;
    }

    let module = module_for_segment(first).unwrap_or(Module::Admin);
    let action = match segs.get(2) {
        Some(&"approve") | Some(&"implement") => Action::Approve,
        _ => action_for_method(method),
    };

    Some(RequiredPermission { module, action })
}

/// Coarse admin-only override, checked independently of the grant table.
pub fn is_admin_only(api_path: &str) -> bool {
    let segs = segments(api_path);
    match segs.as_slice() {
        [first, ..] if ADMIN_ONLY_SEGMENTS.contains(first) => true,
        ["settings", "email", ..] | ["settings-email", ..] => true,
        _ => false,
    }
}
