use serde::{Deserialize, Serialize};

use super::tax_rules::{self as rules, Brackets};

/// Tax location. Only California and Alabama carry state/local rules; any
/// other location owes federal and payroll tax only.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Jurisdiction {
    California,
    Alabama,
    #[serde(alias = "other", alias = "none")]
    Unmodeled,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilingStatus {
    #[default]
    MarriedJointly,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxResult {
    pub federal_ordinary_tax: f64,
    pub federal_ltcg_tax: f64,
    pub niit_tax: f64,
    pub regular_federal_total: f64,
    pub amti: f64,
    pub amt_tax: f64,
    pub is_amt_triggered: bool,
    pub total_federal_liability: f64,
    pub payroll_tax: f64,
    pub state_tax: f64,
    pub ca_sdi_tax: f64,
    /// Portion of the California liability owed only because its AMT won.
    pub ca_amt_tax: f64,
    pub al_occupational_tax: f64,
    pub total_tax: f64,
    pub effective_rate: f64,
}

/// One year's income, split by how each piece is taxed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TaxInputs {
    pub wages: f64,
    pub other_ordinary: f64,
    pub ltcg: f64,
    pub iso_spread: f64,
    pub amt_adjustment: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct TaxEngine {
    jurisdiction: Jurisdiction,
    filing_status: FilingStatus,
}

impl TaxEngine {
    pub fn new(jurisdiction: Jurisdiction, filing_status: FilingStatus) -> Self {
        Self {
            jurisdiction,
            filing_status,
        }
    }

    pub fn jurisdiction(&self) -> Jurisdiction {
        self.jurisdiction
    }

    pub fn filing_status(&self) -> FilingStatus {
        self.filing_status
    }

    /// Projects one year's liability. `ordinary_income` is treated as W-2 wages
    /// for payroll purposes; LTCG stacks on top of it for bracket placement.
    pub fn run_projection(
        &self,
        ordinary_income: f64,
        ltcg_income: f64,
        iso_spread: f64,
        amt_adjustment: f64,
    ) -> TaxResult {
        self.project(&TaxInputs {
            wages: ordinary_income,
            other_ordinary: 0.0,
            ltcg: ltcg_income,
            iso_spread,
            amt_adjustment,
        })
    }

    /// Like `run_projection`, but ordinary income that is not wages (such as
    /// retirement-account distributions) is kept out of payroll-style taxes.
    pub fn project(&self, inputs: &TaxInputs) -> TaxResult {
        let wages = sanitize(inputs.wages);
        let ordinary = wages + sanitize(inputs.other_ordinary);
        let ltcg = sanitize(inputs.ltcg);
        let agi = ordinary + ltcg;

        let taxable_ordinary = (ordinary - rules::STANDARD_DEDUCTION_MFJ).max(0.0);
        let total_taxable = (agi - rules::STANDARD_DEDUCTION_MFJ).max(0.0);
        let taxable_ltcg = (total_taxable - taxable_ordinary).max(0.0);

        let federal_ordinary_tax = marginal_tax(taxable_ordinary, rules::FEDERAL_BRACKETS_MFJ);
        let federal_ltcg_tax = stacked_ltcg_tax(taxable_ordinary, taxable_ltcg);
        let niit_tax = niit(agi, ltcg);
        let regular_federal_total = federal_ordinary_tax + federal_ltcg_tax + niit_tax;

        let amti = agi + sanitize_signed(inputs.iso_spread) + sanitize_signed(inputs.amt_adjustment);
        let amt_tax = federal_amt(amti);
        let total_federal_liability = regular_federal_total.max(amt_tax);
        let is_amt_triggered = amt_tax > regular_federal_total;

        let payroll_tax = payroll(wages);

        let mut state_tax = 0.0;
        let mut ca_sdi_tax = 0.0;
        let mut ca_amt_tax = 0.0;
        let mut al_occupational_tax = 0.0;

        match self.jurisdiction {
            Jurisdiction::California => {
                // LTCG is ordinary income for California.
                let mut regular = marginal_tax(total_taxable, rules::CA_BRACKETS_MFJ);
                if total_taxable > rules::CA_MENTAL_HEALTH_SURCHARGE_THRESHOLD {
                    regular += (total_taxable - rules::CA_MENTAL_HEALTH_SURCHARGE_THRESHOLD)
                        * rules::CA_MENTAL_HEALTH_SURCHARGE_RATE;
                }
                let tentative_amt = california_amt(amti);
                state_tax = regular.max(tentative_amt);
                ca_amt_tax = (tentative_amt - regular).max(0.0);
                ca_sdi_tax = wages * rules::CA_SDI_RATE;
            }
            Jurisdiction::Alabama => {
                let al_taxable = (total_taxable - total_federal_liability).max(0.0);
                state_tax = marginal_tax(al_taxable, rules::AL_BRACKETS_MFJ);
                al_occupational_tax = wages * rules::AL_OCCUPATIONAL_TAX_RATE;
            }
            Jurisdiction::Unmodeled => {}
        }

        let total_tax =
            total_federal_liability + state_tax + payroll_tax + ca_sdi_tax + al_occupational_tax;
        let effective_rate = if agi > 0.0 { total_tax / agi } else { 0.0 };

        TaxResult {
            federal_ordinary_tax,
            federal_ltcg_tax,
            niit_tax,
            regular_federal_total,
            amti,
            amt_tax,
            is_amt_triggered,
            total_federal_liability,
            payroll_tax,
            state_tax,
            ca_sdi_tax,
            ca_amt_tax,
            al_occupational_tax,
            total_tax,
            effective_rate,
        }
    }

    pub fn total_tax(&self, ordinary_income: f64, ltcg_income: f64) -> f64 {
        self.run_projection(ordinary_income, ltcg_income, 0.0, 0.0)
            .total_tax
    }
}

/// Tax on plain ordinary income in `jurisdiction`.
pub fn calculate_taxes(income: f64, jurisdiction: Jurisdiction) -> f64 {
    TaxEngine::new(jurisdiction, FilingStatus::MarriedJointly).total_tax(income, 0.0)
}

pub(crate) fn marginal_tax(taxable_income: f64, brackets: Brackets) -> f64 {
    let mut tax = 0.0;
    for (idx, &(threshold, rate)) in brackets.iter().enumerate() {
        if taxable_income <= threshold {
            break;
        }
        let upper = brackets
            .get(idx + 1)
            .map(|&(next, _)| next)
            .unwrap_or(f64::INFINITY);
        tax += (taxable_income.min(upper) - threshold) * rate;
    }
    tax
}

fn stacked_ltcg_tax(taxable_ordinary: f64, taxable_ltcg: f64) -> f64 {
    let combined = marginal_tax(taxable_ordinary + taxable_ltcg, rules::LTCG_BRACKETS_MFJ);
    let base = marginal_tax(taxable_ordinary, rules::LTCG_BRACKETS_MFJ);
    (combined - base).max(0.0)
}

fn niit(magi: f64, net_investment_income: f64) -> f64 {
    let excess = (magi - rules::NIIT_THRESHOLD_MFJ).max(0.0);
    net_investment_income.min(excess).max(0.0) * rules::NIIT_RATE
}

fn payroll(wages: f64) -> f64 {
    let social_security = wages.min(rules::SS_WAGE_BASE) * rules::SS_RATE;
    let medicare = wages * rules::MEDICARE_RATE;
    let additional = (wages - rules::ADDITIONAL_MEDICARE_THRESHOLD_MFJ).max(0.0)
        * rules::ADDITIONAL_MEDICARE_RATE;
    social_security + medicare + additional
}

fn amt_base(amti: f64, exemption: f64, phaseout_start: f64) -> f64 {
    let reduction = (amti - phaseout_start).max(0.0) * rules::AMT_PHASEOUT_RATE;
    let available_exemption = (exemption - reduction).max(0.0);
    (amti - available_exemption).max(0.0)
}

fn federal_amt(amti: f64) -> f64 {
    let base = amt_base(amti, rules::AMT_EXEMPTION_MFJ, rules::AMT_PHASEOUT_START_MFJ);
    if base <= rules::AMT_RATE_BREAKPOINT {
        base * rules::AMT_LOWER_RATE
    } else {
        rules::AMT_RATE_BREAKPOINT * rules::AMT_LOWER_RATE
            + (base - rules::AMT_RATE_BREAKPOINT) * rules::AMT_UPPER_RATE
    }
}

fn california_amt(amti: f64) -> f64 {
    amt_base(amti, rules::CA_AMT_EXEMPTION_MFJ, rules::CA_AMT_PHASEOUT_START_MFJ)
        * rules::CA_AMT_RATE
}

fn sanitize(amount: f64) -> f64 {
    if amount.is_finite() { amount.max(0.0) } else { 0.0 }
}

fn sanitize_signed(amount: f64) -> f64 {
    if amount.is_finite() { amount } else { 0.0 }
}
