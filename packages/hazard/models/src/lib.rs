#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Hazard attribute taxonomy and the typed attribute map.
//!
//! Every numeric attribute a neighborhood hazard record can carry is a
//! [`HazardAttribute`] variant. The string form of each variant is the exact
//! property key used in source `GeoJSON` documents, so decoding and
//! re-serialization never need a separate name mapping.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString, IntoStaticStr};

/// Grouping of hazard attributes, used for reporting and feature selection.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AttributeCategory {
    /// Source coordinates (projected and geographic)
    Coordinate,
    /// Population and building counts and densities
    Demographic,
    /// Fault distances, earthquake counts and magnitude statistics
    Seismic,
    /// Peak ground acceleration scenarios
    GroundMotion,
    /// Shear-wave velocity proxies
    Soil,
    /// Raw impact sub-scores
    ImpactRaw,
    /// Normalized impact sub-scores
    ImpactNormalized,
    /// Composite risk scores and labels
    Composite,
    /// Distances to landmarks
    Distance,
    /// Fault interaction and seismic hazard indices
    Fault,
    /// Vulnerability indices
    Vulnerability,
}

/// A typed numeric attribute of a hazard record.
///
/// The strum/serde string form is the property key in source documents.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    IntoStaticStr,
)]
#[serde(into = "&'static str", try_from = "String")]
pub enum HazardAttribute {
    // ── Coordinate ───────────────────────────────────────
    #[strum(serialize = "X")]
    X,
    #[strum(serialize = "Y")]
    Y,
    #[strum(serialize = "xcoord")]
    Xcoord,
    #[strum(serialize = "ycoord")]
    Ycoord,

    // ── Demographic ──────────────────────────────────────
    /// Total population
    #[strum(serialize = "toplam_nufus")]
    ToplamNufus,
    /// Total building count
    #[strum(serialize = "toplam_bina")]
    ToplamBina,
    #[strum(serialize = "population_density")]
    PopulationDensity,
    #[strum(serialize = "building_density")]
    BuildingDensity,

    // ── Seismic ──────────────────────────────────────────
    /// Joyner-Boore distance to the nearest fault rupture
    #[strum(serialize = "rjb_km")]
    RjbKm,
    #[strum(serialize = "earthquake_min_distance_km")]
    EarthquakeMinDistanceKm,
    #[strum(serialize = "earthquake_mean_distance_km")]
    EarthquakeMeanDistanceKm,
    #[strum(serialize = "earthquake_count_5km")]
    EarthquakeCount5Km,
    #[strum(serialize = "earthquake_count_10km")]
    EarthquakeCount10Km,
    #[strum(serialize = "earthquake_count_20km")]
    EarthquakeCount20Km,
    #[strum(serialize = "earthquake_count_50km")]
    EarthquakeCount50Km,
    #[strum(serialize = "max_magnitude_nearby_20km")]
    MaxMagnitudeNearby20Km,
    #[strum(serialize = "mean_magnitude_nearby_20km")]
    MeanMagnitudeNearby20Km,
    #[strum(serialize = "strong_earthquakes_20km")]
    StrongEarthquakes20Km,
    #[strum(serialize = "moderate_earthquakes_20km")]
    ModerateEarthquakes20Km,
    #[strum(serialize = "seismic_intensity_factor")]
    SeismicIntensityFactor,
    #[strum(serialize = "max_intensity_nearby")]
    MaxIntensityNearby,
    #[strum(serialize = "weighted_magnitude_by_distance")]
    WeightedMagnitudeByDistance,
    #[strum(serialize = "earthquake_density_50km")]
    EarthquakeDensity50Km,

    // ── Ground motion ────────────────────────────────────
    #[strum(serialize = "pga_scenario_mw72")]
    PgaScenarioMw72,
    #[strum(serialize = "pga_scenario_mw75")]
    PgaScenarioMw75,
    #[strum(serialize = "pga_ratio_mw75_72")]
    PgaRatioMw75To72,
    #[strum(serialize = "pga_total_scenario")]
    PgaTotalScenario,
    #[strum(serialize = "pga_magnitude_sensitivity")]
    PgaMagnitudeSensitivity,
    #[strum(serialize = "earthquake_pga_mean")]
    EarthquakePgaMean,
    #[strum(serialize = "earthquake_pga_max")]
    EarthquakePgaMax,

    // ── Soil ─────────────────────────────────────────────
    /// Time-averaged shear-wave velocity in the top 30 m
    #[strum(serialize = "vs30")]
    Vs30,
    #[strum(serialize = "vs30_mean")]
    Vs30Mean,
    #[strum(serialize = "vs30_combined")]
    Vs30Combined,
    #[strum(serialize = "vs30_risk_level")]
    Vs30RiskLevel,

    // ── Impact (raw) ─────────────────────────────────────
    /// Human impact
    #[strum(serialize = "insan_etkisi_raw")]
    InsanEtkisiRaw,
    /// Building impact
    #[strum(serialize = "bina_etkisi_raw")]
    BinaEtkisiRaw,
    /// Ground impact
    #[strum(serialize = "zemin_etkisi_raw")]
    ZeminEtkisiRaw,
    /// Infrastructure impact
    #[strum(serialize = "altyapi_etkisi_raw")]
    AltyapiEtkisiRaw,
    /// Shelter impact
    #[strum(serialize = "barinma_etkisi_raw")]
    BarinmaEtkisiRaw,

    // ── Impact (normalized) ──────────────────────────────
    #[strum(serialize = "insan_etkisi_norm")]
    InsanEtkisiNorm,
    #[strum(serialize = "bina_etkisi_norm")]
    BinaEtkisiNorm,
    #[strum(serialize = "zemin_etkisi_norm")]
    ZeminEtkisiNorm,
    #[strum(serialize = "altyapi_etkisi_norm")]
    AltyapiEtkisiNorm,
    #[strum(serialize = "barinma_etkisi_norm")]
    BarinmaEtkisiNorm,

    // ── Composite ────────────────────────────────────────
    /// Composite risk score
    #[strum(serialize = "bilesik_risk_skoru")]
    BilesikRiskSkoru,
    /// Five-level risk label
    #[strum(serialize = "risk_label_5li")]
    RiskLabel5li,
    #[strum(serialize = "risk_label_normalized")]
    RiskLabelNormalized,

    // ── Distance ─────────────────────────────────────────
    #[strum(serialize = "distance_to_city_center_km")]
    DistanceToCityCenterKm,
    #[strum(serialize = "distance_to_bosphorus_km")]
    DistanceToBosphorusKm,
    #[strum(serialize = "distance_to_marmara_km")]
    DistanceToMarmaraKm,

    // ── Fault ────────────────────────────────────────────
    #[strum(serialize = "fault_pga_interaction")]
    FaultPgaInteraction,
    #[strum(serialize = "fault_risk_factor")]
    FaultRiskFactor,
    #[strum(serialize = "fault_proximity_level")]
    FaultProximityLevel,
    #[strum(serialize = "total_seismic_exposure")]
    TotalSeismicExposure,
    #[strum(serialize = "comprehensive_earthquake_risk")]
    ComprehensiveEarthquakeRisk,
    #[strum(serialize = "seismic_hazard_index")]
    SeismicHazardIndex,

    // ── Vulnerability ────────────────────────────────────
    #[strum(serialize = "total_vulnerability")]
    TotalVulnerability,
    #[strum(serialize = "infrastructure_vulnerability")]
    InfrastructureVulnerability,
    #[strum(serialize = "human_building_vulnerability")]
    HumanBuildingVulnerability,
    #[strum(serialize = "combined_risk_index")]
    CombinedRiskIndex,
}

impl HazardAttribute {
    /// The composite score used for risk aggregation and ranking.
    pub const COMPOSITE_RISK: Self = Self::BilesikRiskSkoru;

    /// The population count summed by district statistics.
    pub const POPULATION: Self = Self::ToplamNufus;

    /// The building count summed by district statistics.
    pub const BUILDINGS: Self = Self::ToplamBina;

    /// Returns the property key used in source documents.
    #[must_use]
    pub fn key(self) -> &'static str {
        self.into()
    }

    /// Returns the storage column name for this attribute.
    ///
    /// Identical to [`Self::key`] except for the single-letter coordinate
    /// keys, which are lowercased.
    #[must_use]
    pub fn column(self) -> &'static str {
        match self {
            Self::X => "x",
            Self::Y => "y",
            other => other.key(),
        }
    }

    /// Returns the category this attribute belongs to.
    #[must_use]
    pub const fn category(self) -> AttributeCategory {
        match self {
            Self::X | Self::Y | Self::Xcoord | Self::Ycoord => AttributeCategory::Coordinate,
            Self::ToplamNufus | Self::ToplamBina | Self::PopulationDensity | Self::BuildingDensity => {
                AttributeCategory::Demographic
            }
            Self::RjbKm
            | Self::EarthquakeMinDistanceKm
            | Self::EarthquakeMeanDistanceKm
            | Self::EarthquakeCount5Km
            | Self::EarthquakeCount10Km
            | Self::EarthquakeCount20Km
            | Self::EarthquakeCount50Km
            | Self::MaxMagnitudeNearby20Km
            | Self::MeanMagnitudeNearby20Km
            | Self::StrongEarthquakes20Km
            | Self::ModerateEarthquakes20Km
            | Self::SeismicIntensityFactor
            | Self::MaxIntensityNearby
            | Self::WeightedMagnitudeByDistance
            | Self::EarthquakeDensity50Km => AttributeCategory::Seismic,
            Self::PgaScenarioMw72
            | Self::PgaScenarioMw75
            | Self::PgaRatioMw75To72
            | Self::PgaTotalScenario
            | Self::PgaMagnitudeSensitivity
            | Self::EarthquakePgaMean
            | Self::EarthquakePgaMax => AttributeCategory::GroundMotion,
            Self::Vs30 | Self::Vs30Mean | Self::Vs30Combined | Self::Vs30RiskLevel => {
                AttributeCategory::Soil
            }
            Self::InsanEtkisiRaw
            | Self::BinaEtkisiRaw
            | Self::ZeminEtkisiRaw
            | Self::AltyapiEtkisiRaw
            | Self::BarinmaEtkisiRaw => AttributeCategory::ImpactRaw,
            Self::InsanEtkisiNorm
            | Self::BinaEtkisiNorm
            | Self::ZeminEtkisiNorm
            | Self::AltyapiEtkisiNorm
            | Self::BarinmaEtkisiNorm => AttributeCategory::ImpactNormalized,
            Self::BilesikRiskSkoru | Self::RiskLabel5li | Self::RiskLabelNormalized => {
                AttributeCategory::Composite
            }
            Self::DistanceToCityCenterKm
            | Self::DistanceToBosphorusKm
            | Self::DistanceToMarmaraKm => AttributeCategory::Distance,
            Self::FaultPgaInteraction
            | Self::FaultRiskFactor
            | Self::FaultProximityLevel
            | Self::TotalSeismicExposure
            | Self::ComprehensiveEarthquakeRisk
            | Self::SeismicHazardIndex => AttributeCategory::Fault,
            Self::TotalVulnerability
            | Self::InfrastructureVulnerability
            | Self::HumanBuildingVulnerability
            | Self::CombinedRiskIndex => AttributeCategory::Vulnerability,
        }
    }

    /// Returns all attributes belonging to the given category.
    #[must_use]
    pub fn for_category(category: AttributeCategory) -> Vec<Self> {
        Self::all()
            .iter()
            .copied()
            .filter(|a| a.category() == category)
            .collect()
    }

    /// Returns all variants of this enum, in storage column order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::X,
            Self::Y,
            Self::Xcoord,
            Self::Ycoord,
            Self::ToplamNufus,
            Self::ToplamBina,
            Self::PopulationDensity,
            Self::BuildingDensity,
            Self::RjbKm,
            Self::EarthquakeMinDistanceKm,
            Self::EarthquakeMeanDistanceKm,
            Self::EarthquakeCount5Km,
            Self::EarthquakeCount10Km,
            Self::EarthquakeCount20Km,
            Self::EarthquakeCount50Km,
            Self::MaxMagnitudeNearby20Km,
            Self::MeanMagnitudeNearby20Km,
            Self::StrongEarthquakes20Km,
            Self::ModerateEarthquakes20Km,
            Self::SeismicIntensityFactor,
            Self::MaxIntensityNearby,
            Self::WeightedMagnitudeByDistance,
            Self::EarthquakeDensity50Km,
            Self::PgaScenarioMw72,
            Self::PgaScenarioMw75,
            Self::PgaRatioMw75To72,
            Self::PgaTotalScenario,
            Self::PgaMagnitudeSensitivity,
            Self::EarthquakePgaMean,
            Self::EarthquakePgaMax,
            Self::Vs30,
            Self::Vs30Mean,
            Self::Vs30Combined,
            Self::Vs30RiskLevel,
            Self::InsanEtkisiRaw,
            Self::BinaEtkisiRaw,
            Self::ZeminEtkisiRaw,
            Self::AltyapiEtkisiRaw,
            Self::BarinmaEtkisiRaw,
            Self::InsanEtkisiNorm,
            Self::BinaEtkisiNorm,
            Self::ZeminEtkisiNorm,
            Self::AltyapiEtkisiNorm,
            Self::BarinmaEtkisiNorm,
            Self::BilesikRiskSkoru,
            Self::RiskLabel5li,
            Self::RiskLabelNormalized,
            Self::DistanceToCityCenterKm,
            Self::DistanceToBosphorusKm,
            Self::DistanceToMarmaraKm,
            Self::FaultPgaInteraction,
            Self::FaultRiskFactor,
            Self::FaultProximityLevel,
            Self::TotalSeismicExposure,
            Self::ComprehensiveEarthquakeRisk,
            Self::SeismicHazardIndex,
            Self::TotalVulnerability,
            Self::InfrastructureVulnerability,
            Self::HumanBuildingVulnerability,
            Self::CombinedRiskIndex,
        ]
    }
}

impl TryFrom<String> for HazardAttribute {
    type Error = strum::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Typed hazard attribute values for one record.
///
/// Attributes absent from the source (or present but not numeric) are
/// simply not in the map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HazardAttributes(BTreeMap<HazardAttribute, f64>);

impl HazardAttributes {
    /// Creates an empty attribute map.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Extracts every recognized attribute from a `GeoJSON` properties
    /// object.
    ///
    /// Numbers are taken as-is; numeric strings are parsed. Anything else
    /// (including `null`) leaves the attribute unset.
    #[must_use]
    pub fn from_properties(properties: &serde_json::Map<String, serde_json::Value>) -> Self {
        let mut values = BTreeMap::new();

        for &attribute in HazardAttribute::all() {
            if let Some(value) = properties.get(attribute.key()).and_then(numeric_value) {
                values.insert(attribute, value);
            }
        }

        Self(values)
    }

    /// Returns the value of an attribute, if set.
    #[must_use]
    pub fn get(&self, attribute: HazardAttribute) -> Option<f64> {
        self.0.get(&attribute).copied()
    }

    /// Sets the value of an attribute.
    pub fn set(&mut self, attribute: HazardAttribute, value: f64) {
        self.0.insert(attribute, value);
    }

    /// Returns the composite risk score, if set.
    #[must_use]
    pub fn composite_risk(&self) -> Option<f64> {
        self.get(HazardAttribute::COMPOSITE_RISK)
    }

    /// Returns the number of attributes that are set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if no attribute is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over set attributes in storage column order.
    pub fn iter(&self) -> impl Iterator<Item = (HazardAttribute, f64)> + '_ {
        self.0.iter().map(|(&a, &v)| (a, v))
    }
}

impl FromIterator<(HazardAttribute, f64)> for HazardAttributes {
    fn from_iter<I: IntoIterator<Item = (HazardAttribute, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Reads a finite number from a JSON value, accepting numeric strings.
fn numeric_value(value: &serde_json::Value) -> Option<f64> {
    let number = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;

    number.is_finite().then_some(number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn keys_are_unique() {
        let mut seen = BTreeSet::new();
        for attribute in HazardAttribute::all() {
            assert!(
                seen.insert(attribute.key()),
                "Duplicate attribute key: {}",
                attribute.key()
            );
        }
    }

    #[test]
    fn columns_are_unique_case_insensitively() {
        let mut seen = BTreeSet::new();
        for attribute in HazardAttribute::all() {
            assert!(
                seen.insert(attribute.column().to_lowercase()),
                "Duplicate column: {}",
                attribute.column()
            );
        }
    }

    #[test]
    fn key_parses_back_to_variant() {
        for &attribute in HazardAttribute::all() {
            let parsed: HazardAttribute = attribute.key().parse().unwrap();
            assert_eq!(parsed, attribute);
        }
        assert!("not_an_attribute".parse::<HazardAttribute>().is_err());
    }

    #[test]
    fn every_category_has_attributes() {
        let categories = [
            AttributeCategory::Coordinate,
            AttributeCategory::Demographic,
            AttributeCategory::Seismic,
            AttributeCategory::GroundMotion,
            AttributeCategory::Soil,
            AttributeCategory::ImpactRaw,
            AttributeCategory::ImpactNormalized,
            AttributeCategory::Composite,
            AttributeCategory::Distance,
            AttributeCategory::Fault,
            AttributeCategory::Vulnerability,
        ];
        let total: usize = categories
            .iter()
            .map(|&c| HazardAttribute::for_category(c).len())
            .sum();
        assert_eq!(total, HazardAttribute::all().len());
        for category in categories {
            assert!(
                !HazardAttribute::for_category(category).is_empty(),
                "{category:?} has no attributes"
            );
        }
    }

    #[test]
    fn extracts_numeric_properties() {
        let properties = serde_json::json!({
            "Name": "Kadikoy",
            "toplam_nufus": 14534.0,
            "toplam_bina": "2180",
            "bilesik_risk_skoru": 0.42,
            "vs30": null,
            "rjb_km": "n/a",
            "unmodeled_field": 7,
        });
        let attributes = HazardAttributes::from_properties(properties.as_object().unwrap());

        assert_eq!(attributes.len(), 3);
        assert_eq!(attributes.get(HazardAttribute::ToplamNufus), Some(14534.0));
        assert_eq!(attributes.get(HazardAttribute::ToplamBina), Some(2180.0));
        assert_eq!(attributes.composite_risk(), Some(0.42));
        assert_eq!(attributes.get(HazardAttribute::Vs30), None);
        assert_eq!(attributes.get(HazardAttribute::RjbKm), None);
    }

    #[test]
    fn serializes_with_source_keys() {
        let attributes: HazardAttributes = [
            (HazardAttribute::EarthquakeCount5Km, 3.0),
            (HazardAttribute::X, 29.0),
        ]
        .into_iter()
        .collect();

        let json = serde_json::to_value(&attributes).unwrap();
        assert_eq!(json["earthquake_count_5km"], 3.0);
        assert_eq!(json["X"], 29.0);

        let back: HazardAttributes = serde_json::from_value(json).unwrap();
        assert_eq!(back, attributes);
    }
}
