//! Waste-disposition report split by hazard class.
//!
//! The report is computed over a customer's whole stored history. Rows are
//! partitioned by the hazard marker (`*` in the waste code) and each
//! partition is reduced to an [`EsrsDataModel`].

use serde::Serialize;

use crate::{
    data::{Value, parse_day_first_date},
    editor::{DATE_COLUMN, round_to},
    error::{PipelineError, Result},
    frame::{Cell, Frame},
};

pub const MATERIAL_RATE_COLUMN: &str = "Materiaalihyotyaste";
pub const ENERGY_RATE_COLUMN: &str = "Energiahyotyaste";
pub const WASTE_CODE_COLUMN: &str = "EWCkoodi";
pub const WEIGHT_COLUMN: &str = "Paino";
pub const PRODUCT_GROUP_COLUMN: &str = "Tuoteryhma";

/// Product groups that always go to final disposal (asbestos, landfill
/// waste, mineral wool).
pub const FINAL_DISPOSAL_GROUPS: &[&str] = &["AS", "KAA", "VI"];

const HAZARD_MARKER: char = '*';
const VALUE_PRECISION: u32 = 3;
const PERCENTAGE_PRECISION: u32 = 2;

/// Waste totals for one hazard partition.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EsrsDataModel {
    pub recovery: f64,
    pub disposal: f64,
    pub preparation_for_reuse: f64,
    pub recycling: f64,
    pub other_recovery_operations: f64,
    pub incineration: f64,
    pub landfilling: f64,
    pub other_disposal_operations: f64,
}

impl EsrsDataModel {
    pub fn non_recycled(&self) -> f64 {
        self.other_recovery_operations
            + self.incineration
            + self.landfilling
            + self.other_disposal_operations
    }

    /// Share of non-recycled waste in percent; zero when nothing was
    /// generated.
    pub fn non_recycled_percentage(&self) -> f64 {
        let total = self.recovery + self.disposal;
        if total == 0.0 {
            0.0
        } else {
            round_to(self.non_recycled() / total * 100.0, PERCENTAGE_PRECISION)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EsrsReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reporting_period: Option<String>,
    pub unit: String,
    pub waste_by_hazardousness: WasteByHazardousness,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WasteByHazardousness {
    pub non_hazardous: CategoryReport,
    pub hazardous: CategoryReport,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryReport {
    pub total_waste_generated: TotalWasteGenerated,
    pub recovery: RecoveryBreakdown,
    pub disposal: DisposalBreakdown,
    pub non_recycled: NonRecycled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TotalWasteGenerated {
    pub recovery: f64,
    pub disposal: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryBreakdown {
    pub preparation_for_reuse: f64,
    pub recycling: f64,
    pub other_recovery_operations: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisposalBreakdown {
    pub incineration: f64,
    pub landfilling: f64,
    pub other_disposal_operations: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NonRecycled {
    pub weight: f64,
    pub percentage: f64,
}

impl From<&EsrsDataModel> for CategoryReport {
    fn from(model: &EsrsDataModel) -> Self {
        let round = |value: f64| round_to(value, VALUE_PRECISION);
        CategoryReport {
            total_waste_generated: TotalWasteGenerated {
                recovery: round(model.recovery),
                disposal: round(model.disposal),
            },
            recovery: RecoveryBreakdown {
                preparation_for_reuse: round(model.preparation_for_reuse),
                recycling: round(model.recycling),
                other_recovery_operations: round(model.other_recovery_operations),
            },
            disposal: DisposalBreakdown {
                incineration: round(model.incineration),
                landfilling: round(model.landfilling),
                other_disposal_operations: round(model.other_disposal_operations),
            },
            non_recycled: NonRecycled {
                weight: round(model.non_recycled()),
                percentage: model.non_recycled_percentage(),
            },
        }
    }
}

/// One history row reduced to the fields the report needs. Rates are
/// fractions in `0..=1`.
#[derive(Debug, Clone, PartialEq)]
struct WasteRow {
    material_rate: Option<f64>,
    energy_rate: Option<f64>,
    weight: Option<f64>,
    final_disposal: bool,
    hazardous: bool,
}

impl WasteRow {
    fn rate_sum(&self) -> Option<f64> {
        Some(self.material_rate? + self.energy_rate?)
    }
}

pub struct EsrsDataParser<'a> {
    frame: &'a Frame,
    unit: &'static str,
}

impl<'a> EsrsDataParser<'a> {
    pub fn new(frame: &'a Frame) -> Self {
        EsrsDataParser {
            frame,
            unit: "tonnes",
        }
    }

    pub fn parse(&self) -> Result<EsrsReport> {
        let rows = self.rows()?;
        let (hazardous, non_hazardous): (Vec<WasteRow>, Vec<WasteRow>) =
            rows.into_iter().partition(|row| row.hazardous);
        let non_hazardous = build_model(&non_hazardous);
        let hazardous = build_model(&hazardous);
        Ok(EsrsReport {
            reporting_period: self.reporting_period(),
            unit: self.unit.to_string(),
            waste_by_hazardousness: WasteByHazardousness {
                non_hazardous: CategoryReport::from(&non_hazardous),
                hazardous: CategoryReport::from(&hazardous),
            },
        })
    }

    fn rows(&self) -> Result<Vec<WasteRow>> {
        let position = |name: &str| {
            self.frame
                .column_position(name)
                .ok_or_else(|| PipelineError::MissingColumn(name.to_string()))
        };
        let material = position(MATERIAL_RATE_COLUMN)?;
        let energy = position(ENERGY_RATE_COLUMN)?;
        let code = position(WASTE_CODE_COLUMN)?;
        let weight = position(WEIGHT_COLUMN)?;
        let group = position(PRODUCT_GROUP_COLUMN)?;

        Ok(self
            .frame
            .rows()
            .iter()
            .map(|row| WasteRow {
                material_rate: number(&row[material]).map(|rate| rate / 100.0),
                energy_rate: number(&row[energy]).map(|rate| rate / 100.0),
                weight: number(&row[weight]),
                final_disposal: text(&row[group])
                    .is_some_and(|g| FINAL_DISPOSAL_GROUPS.contains(&g.as_str())),
                hazardous: text(&row[code]).is_some_and(|c| c.contains(HAZARD_MARKER)),
            })
            .collect())
    }

    /// `"<oldest> - <newest>"` over the parseable dates of the date column.
    fn reporting_period(&self) -> Option<String> {
        let values = self.frame.column_values(DATE_COLUMN)?;
        let (oldest, newest) = values
            .into_iter()
            .filter_map(|cell| match cell {
                Some(Value::Date(date)) => Some(*date),
                Some(other) => parse_day_first_date(&other.as_display()),
                None => None,
            })
            .fold(None, |range, date| match range {
                None => Some((date, date)),
                Some((lo, hi)) => Some((date.min(lo), date.max(hi))),
            })?;
        Some(format!("{oldest} - {newest}"))
    }
}

fn number(cell: &Cell) -> Option<f64> {
    cell.as_ref().and_then(Value::as_f64)
}

fn text(cell: &Cell) -> Option<String> {
    cell.as_ref().map(|v| v.as_display().trim().to_string())
}

fn build_model(rows: &[WasteRow]) -> EsrsDataModel {
    let mut model = EsrsDataModel::default();
    for row in rows {
        if row.final_disposal {
            let Some(weight) = row.weight else { continue };
            model.disposal += weight;
            match row.rate_sum() {
                Some(sum) if sum == 0.0 => model.landfilling += weight,
                Some(sum) if sum > 0.0 && sum < 1.0 => model.other_disposal_operations += weight,
                _ => {}
            }
        } else if let (Some(sum), Some(weight)) = (row.rate_sum(), row.weight) {
            model.recovery += sum * weight;
        }
        if let (Some(rate), Some(weight)) = (row.material_rate, row.weight) {
            model.recycling += rate * weight;
        }
        if let (Some(rate), Some(weight)) = (row.energy_rate, row.weight) {
            model.other_recovery_operations += rate * weight;
        }
    }
    model
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(rows: &[[&str; 6]]) -> Frame {
        let rows: Vec<Vec<&str>> = rows.iter().map(|r| r.to_vec()).collect();
        Frame::from_text(
            &[
                DATE_COLUMN,
                MATERIAL_RATE_COLUMN,
                ENERGY_RATE_COLUMN,
                WASTE_CODE_COLUMN,
                WEIGHT_COLUMN,
                PRODUCT_GROUP_COLUMN,
            ],
            &rows,
        )
        .unwrap()
    }

    #[test]
    fn partitions_are_computed_independently() {
        let frame = history(&[
            ["2024-01-10", "50", "25", "170101", "2", "BET"],
            ["2024-03-05", "0", "0", "170601*", "4", "AS"],
        ]);
        let report = EsrsDataParser::new(&frame).parse().unwrap();
        let non_hazardous = &report.waste_by_hazardousness.non_hazardous;
        let hazardous = &report.waste_by_hazardousness.hazardous;

        assert_eq!(non_hazardous.total_waste_generated.recovery, 1.5);
        assert_eq!(non_hazardous.total_waste_generated.disposal, 0.0);
        assert_eq!(non_hazardous.recovery.recycling, 1.0);
        assert_eq!(non_hazardous.recovery.other_recovery_operations, 0.5);
        assert_eq!(non_hazardous.non_recycled.weight, 0.5);
        assert_eq!(non_hazardous.non_recycled.percentage, 33.33);

        assert_eq!(hazardous.total_waste_generated.recovery, 0.0);
        assert_eq!(hazardous.total_waste_generated.disposal, 4.0);
        assert_eq!(hazardous.disposal.landfilling, 4.0);
        assert_eq!(hazardous.non_recycled.percentage, 100.0);

        assert_eq!(report.reporting_period.as_deref(), Some("2024-01-10 - 2024-03-05"));
    }

    #[test]
    fn partial_recovery_disposal_counts_as_other_disposal() {
        let frame = history(&[["", "30", "20", "170904", "10", "KAA"]]);
        let report = EsrsDataParser::new(&frame).parse().unwrap();
        let block = &report.waste_by_hazardousness.non_hazardous;
        assert_eq!(block.disposal.other_disposal_operations, 10.0);
        assert_eq!(block.disposal.landfilling, 0.0);
        assert!(report.reporting_period.is_none());
    }

    #[test]
    fn empty_partition_guards_division() {
        let model = EsrsDataModel::default();
        assert_eq!(model.non_recycled_percentage(), 0.0);
        let report = CategoryReport::from(&model);
        assert_eq!(report.non_recycled.percentage, 0.0);
    }

    #[test]
    fn missing_required_column_is_reported() {
        let frame = Frame::from_text(&[WEIGHT_COLUMN], &[vec!["1"]]).unwrap();
        let err = EsrsDataParser::new(&frame).parse().unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn(col) if col == MATERIAL_RATE_COLUMN));
    }

    #[test]
    fn report_serializes_with_camel_case_keys() {
        let frame = history(&[["", "100", "0", "170101", "1", "BET"]]);
        let report = EsrsDataParser::new(&frame).parse().unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["unit"], "tonnes");
        assert!(json.get("reportingPeriod").is_none());
        assert_eq!(
            json["wasteByHazardousness"]["nonHazardous"]["recovery"]["recycling"],
            1.0
        );
        assert!(json["wasteByHazardousness"]["hazardous"]["nonRecycled"]["percentage"].is_number());
    }
}
