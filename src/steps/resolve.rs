//! Lookups that turn template identifiers into provider resources.

use crate::config::ImageFilter;
use crate::pipeline::BuildError;
use crate::provider::{
    Architecture, CloudApi, Image, ImageKind, ImageQuery, PrimaryIp, PrimaryIpKind,
};

/// Resolves each SSH key by id or name.
pub(crate) async fn ssh_keys(
    api: &dyn CloudApi,
    names: &[String],
) -> Result<Vec<i64>, BuildError> {
    let mut ids = Vec::with_capacity(names.len());
    for id_or_name in names {
        let key = api
            .get_ssh_key(id_or_name)
            .await
            .map_err(|err| {
                BuildError::request(format!("Could not fetch SSH key '{id_or_name}'"), err)
            })?
            .ok_or_else(|| BuildError::NotFound {
                kind: "SSH key",
                name: id_or_name.clone(),
            })?;
        ids.push(key.id);
    }
    Ok(ids)
}

/// Resolves each firewall by id or name.
pub(crate) async fn firewalls(
    api: &dyn CloudApi,
    names: &[String],
) -> Result<Vec<i64>, BuildError> {
    let mut ids = Vec::with_capacity(names.len());
    for id_or_name in names {
        let firewall = api
            .get_firewall(id_or_name)
            .await
            .map_err(|err| {
                BuildError::request(format!("Could not fetch firewall '{id_or_name}'"), err)
            })?
            .ok_or_else(|| BuildError::NotFound {
                kind: "firewall",
                name: id_or_name.clone(),
            })?;
        ids.push(firewall.id);
    }
    Ok(ids)
}

/// Resolves an image by id or name for `architecture`.
pub(crate) async fn image_by_name(
    api: &dyn CloudApi,
    id_or_name: &str,
    architecture: Architecture,
) -> Result<Image, BuildError> {
    api.get_image_for_architecture(id_or_name, architecture)
        .await
        .map_err(|err| BuildError::request("Could not find image", err))?
        .ok_or_else(|| BuildError::NotFound {
            kind: "image",
            name: id_or_name.to_owned(),
        })
}

/// Resolves an image by label selector among available snapshots of
/// `architecture`.
pub(crate) async fn image_by_selector(
    api: &dyn CloudApi,
    filter: &ImageFilter,
    architecture: Architecture,
) -> Result<Image, BuildError> {
    let selector = filter.label_selector();
    let query = ImageQuery {
        kind: Some(ImageKind::Snapshot),
        architecture: Some(architecture),
        label_selector: Some(selector.clone()),
        available_only: true,
    };
    let images = api
        .list_images(&query)
        .await
        .map_err(|err| BuildError::request("Could not find image", err))?;
    select_image(images, &selector, filter.most_recent)
}

/// Picks the single match, or the newest one when `most_recent` is set.
///
/// # Errors
///
/// Returns [`BuildError::NoImageForSelector`] for zero matches and
/// [`BuildError::AmbiguousImageSelector`] for several matches without
/// `most_recent`.
pub fn select_image(
    mut images: Vec<Image>,
    selector: &str,
    most_recent: bool,
) -> Result<Image, BuildError> {
    if images.len() > 1 {
        if !most_recent {
            return Err(BuildError::AmbiguousImageSelector(selector.to_owned()));
        }
        images.sort_by(|left, right| right.created.cmp(&left.created));
    }
    images
        .into_iter()
        .next()
        .ok_or_else(|| BuildError::NoImageForSelector(selector.to_owned()))
}

/// Resolves a primary IP by id or name, then by address, and checks its
/// family.
pub(crate) async fn primary_ip(
    api: &dyn CloudApi,
    reference: &str,
    expected: PrimaryIpKind,
) -> Result<PrimaryIp, BuildError> {
    let fetch_context = || format!("Could not fetch primary ip '{reference}'");
    let by_id_or_name = api
        .get_primary_ip(reference)
        .await
        .map_err(|err| BuildError::request(fetch_context(), err))?;
    let found = match by_id_or_name {
        Some(found) => found,
        None => api
            .get_primary_ip_by_ip(reference)
            .await
            .map_err(|err| BuildError::request(fetch_context(), err))?
            .ok_or_else(|| BuildError::NotFound {
                kind: "primary ip",
                name: reference.to_owned(),
            })?,
    };
    if found.kind != expected {
        return Err(BuildError::PrimaryIpFamily {
            ip: reference.to_owned(),
            family: match expected {
                PrimaryIpKind::Ipv4 => "IPv4",
                PrimaryIpKind::Ipv6 => "IPv6",
            },
        });
    }
    Ok(found)
}
