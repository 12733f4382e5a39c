use std::collections::HashMap;

use url::Url;

use crate::{
    error::{IoriError, IoriResult},
    hls::playlist::{MasterDocument, VariantEntry},
};

/// Named renditions of a master playlist.
///
/// Entries sharing a name are mirrors of the same quality. The first one in
/// document order is selected, later ones stay reachable via [`VariantSet::alternates`].
#[derive(Debug, Clone)]
pub struct VariantSet {
    selected: Vec<VariantEntry>,
    alternates: Vec<VariantEntry>,
}

pub struct VariantSelector;

impl VariantSelector {
    pub fn select(master: &MasterDocument) -> IoriResult<VariantSet> {
        if master.variants.is_empty() {
            return Err(IoriError::NoVariantsFound);
        }

        let mut selected: Vec<VariantEntry> = Vec::new();
        let mut alternates = Vec::new();
        for variant in master.variants.iter() {
            if selected.iter().any(|v| v.name == variant.name) {
                tracing::debug!(
                    "Variant {} already selected, keeping {} as alternate.",
                    variant.name,
                    variant.media_playlist_url
                );
                alternates.push(variant.clone());
            } else {
                selected.push(variant.clone());
            }
        }

        Ok(VariantSet {
            selected,
            alternates,
        })
    }
}

impl VariantSet {
    pub fn get(&self, name: &str) -> Option<&VariantEntry> {
        self.selected.iter().find(|v| v.name == name)
    }

    pub fn url(&self, name: &str) -> Option<&Url> {
        self.get(name).map(|v| &v.media_playlist_url)
    }

    /// Mapping of every exposed name to its media playlist.
    pub fn urls(&self) -> HashMap<String, Url> {
        self.selected
            .iter()
            .map(|v| (v.name.clone(), v.media_playlist_url.clone()))
            .collect()
    }

    /// Names in document order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.selected.iter().map(|v| v.name.as_str())
    }

    /// Entry with the highest bandwidth. Ties go to the earlier entry.
    pub fn best(&self) -> &VariantEntry {
        self.selected
            .iter()
            .reduce(|best, v| if v.bandwidth > best.bandwidth { v } else { best })
            .unwrap_or(&self.selected[0])
    }

    /// Entry with the lowest bandwidth. Ties go to the earlier entry.
    pub fn worst(&self) -> &VariantEntry {
        self.selected
            .iter()
            .reduce(|worst, v| if v.bandwidth < worst.bandwidth { v } else { worst })
            .unwrap_or(&self.selected[0])
    }

    pub fn alternates<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a VariantEntry> {
        self.alternates.iter().filter(move |v| v.name == name)
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }
}
