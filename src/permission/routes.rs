//! Front-end route tree built from a user's menus

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use super::PermissionResolver;
use crate::entity::{menu, menu_meta, user_info};
use crate::error::AppResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteMeta {
    pub title: String,
    pub icon: String,
    pub show_link: bool,
    pub show_parent: bool,
    pub keep_alive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_src: Option<String>,
    pub rank: i32,
    /// Names of the permission menus under this route
    pub auths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteNode {
    pub id: i64,
    pub path: String,
    pub name: String,
    pub component: String,
    pub meta: RouteMeta,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RouteNode>,
}

/// Flat menu entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub id: i64,
    pub parent_id: i64,
    pub name: String,
    pub menu_type: i32,
    pub path: String,
    pub component: String,
    pub method: String,
    pub title: String,
    pub rank: i32,
}

/// Active menus visible to the user; superusers see every active menu
pub async fn accessible_menus(
    resolver: &PermissionResolver,
    user: &user_info::Model,
) -> AppResult<Vec<menu::Model>> {
    if user.is_superuser {
        let menus = resolver.store().all_menus().await?;
        return Ok(menus.into_iter().filter(|m| m.is_active).collect());
    }
    Ok(resolver.get_user_menu_queryset(user).await?.unwrap_or_default())
}

/// Build the navigation tree.
///
/// Permission menus become `auths` of their parent; menus whose parent is
/// not among `menus` are dropped.
pub fn build_route_tree(menus: &[menu::Model], metas: &[menu_meta::Model]) -> Vec<RouteNode> {
    let metas: BTreeMap<i64, &menu_meta::Model> = metas.iter().map(|m| (m.menu_id, m)).collect();
    let mut children: BTreeMap<i64, Vec<&menu::Model>> = BTreeMap::new();
    let mut auths: BTreeMap<i64, Vec<String>> = BTreeMap::new();
    for m in menus {
        if m.is_permission() {
            auths.entry(m.parent_id).or_default().push(m.name.clone());
        } else {
            children.entry(m.parent_id).or_default().push(m);
        }
    }
    let mut visited = HashSet::new();
    build_level(0, &children, &auths, &metas, &mut visited)
}

fn build_level(
    parent_id: i64,
    children: &BTreeMap<i64, Vec<&menu::Model>>,
    auths: &BTreeMap<i64, Vec<String>>,
    metas: &BTreeMap<i64, &menu_meta::Model>,
    visited: &mut HashSet<i64>,
) -> Vec<RouteNode> {
    let Some(level) = children.get(&parent_id) else {
        return Vec::new();
    };
    let mut nodes = Vec::with_capacity(level.len());
    for m in level {
        if !visited.insert(m.id) {
            continue;
        }
        let meta = metas
            .get(&m.id)
            .map(|meta| (*meta).clone())
            .unwrap_or_else(|| menu_meta::Model::placeholder(m.id, &m.name));
        nodes.push(RouteNode {
            id: m.id,
            path: m.path.clone(),
            name: m.name.clone(),
            component: m.component.clone(),
            meta: RouteMeta {
                title: meta.title,
                icon: meta.icon,
                show_link: meta.is_show_menu,
                show_parent: meta.is_show_parent,
                keep_alive: meta.is_keepalive,
                frame_src: meta.frame_url,
                rank: m.rank,
                auths: auths.get(&m.id).cloned().unwrap_or_default(),
            },
            children: build_level(m.id, children, auths, metas, visited),
        });
    }
    nodes
}

/// Flat list of the navigation menus, titles taken from their meta rows
pub fn flat_menus(menus: &[menu::Model], metas: &[menu_meta::Model]) -> Vec<MenuItem> {
    let titles: BTreeMap<i64, &str> = metas.iter().map(|m| (m.menu_id, m.title.as_str())).collect();
    menus
        .iter()
        .filter(|m| !m.is_permission())
        .map(|m| MenuItem {
            id: m.id,
            parent_id: m.parent_id,
            name: m.name.clone(),
            menu_type: m.menu_type,
            path: m.path.clone(),
            component: m.component.clone(),
            method: m.method.clone(),
            title: titles.get(&m.id).map(|t| t.to_string()).unwrap_or_else(|| m.name.clone()),
            rank: m.rank,
        })
        .collect()
}
