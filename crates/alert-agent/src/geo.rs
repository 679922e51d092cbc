use models::{normalize_label, FarmerProfile, Id, Region};
use std::collections::{BTreeMap, HashMap};

/// Resolves the free-text districts of farmer profiles to regions, and groups
/// farmers by the region they belong to.
#[derive(Debug, Clone)]
pub struct GeoIndex {
    regions: Vec<Region>,
    by_label: HashMap<String, usize>,
}

/// Farmers grouped by resolved region.
#[derive(Debug, Default)]
pub struct RegionGroups {
    pub by_region: BTreeMap<Id, Vec<FarmerProfile>>,
    /// Farmers whose district is missing or doesn't match any region.
    pub unresolved: Vec<uuid::Uuid>,
}

impl GeoIndex {
    pub fn new(regions: Vec<Region>) -> GeoIndex {
        let mut by_label = HashMap::new();

        for (index, region) in regions.iter().enumerate() {
            for label in std::iter::once(&region.name).chain(region.aliases.iter()) {
                let key = normalize_label(label);
                if key.is_empty() {
                    continue;
                }
                if let Some(prior) = by_label.insert(key, index) {
                    if prior != index {
                        tracing::warn!(
                            %label,
                            region = %region.name,
                            shadowed = %regions[prior].name,
                            "region label is ambiguous, using the later region"
                        );
                    }
                }
            }
        }

        GeoIndex { regions, by_label }
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn get(&self, id: Id) -> Option<&Region> {
        self.regions.iter().find(|r| r.id == id)
    }

    /// Resolves a district name, as entered by a user, to a region.
    pub fn resolve(&self, district: &str) -> Option<&Region> {
        self.by_label
            .get(&normalize_label(district))
            .map(|index| &self.regions[*index])
    }

    pub fn resolve_farmer(&self, farmer: &FarmerProfile) -> Option<&Region> {
        farmer.district.as_deref().and_then(|d| self.resolve(d))
    }

    /// Groups farmers by region. A farmer belongs to at most one region.
    pub fn group(&self, farmers: Vec<FarmerProfile>) -> RegionGroups {
        let mut groups = RegionGroups::default();

        for farmer in farmers {
            match self.resolve_farmer(&farmer).map(|r| r.id) {
                Some(region_id) => groups.by_region.entry(region_id).or_default().push(farmer),
                None => {
                    tracing::debug!(user_id = %farmer.user_id, district = ?farmer.district, "farmer district does not resolve to a region");
                    groups.unresolved.push(farmer.user_id);
                }
            }
        }
        groups
    }
}
