//! Domain models for Tally

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A card or bank account; card accounts scope billing cycles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub name: String,
    /// Card issuer or bank name
    pub issuer: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What a category's transactions represent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryKind {
    Expense,
    Income,
    /// Aggregate credit-card bill payments
    CardBill,
    Transfer,
}

impl CategoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expense => "expense",
            Self::Income => "income",
            Self::CardBill => "card_bill",
            Self::Transfer => "transfer",
        }
    }
}

impl std::str::FromStr for CategoryKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "expense" => Ok(Self::Expense),
            "income" => Ok(Self::Income),
            "card_bill" | "bill" => Ok(Self::CardBill),
            "transfer" => Ok(Self::Transfer),
            _ => Err(format!("Unknown category kind: {}", s)),
        }
    }
}

impl std::fmt::Display for CategoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An entry in the category catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub kind: CategoryKind,
    pub created_at: DateTime<Utc>,
}

/// Direction of a ledger transaction. Amounts are stored as magnitudes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    #[default]
    Expense,
    Income,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expense => "expense",
            Self::Income => "income",
        }
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "expense" => Ok(Self::Expense),
            "income" => Ok(Self::Income),
            _ => Err(format!("Unknown transaction kind: {}", s)),
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transaction source - how it was created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransactionSource {
    /// Manually entered (or recorded by another collaborator)
    #[default]
    Manual,
    /// Created by expanding a bill into its statement lines
    Statement,
}

impl TransactionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Statement => "statement",
        }
    }
}

impl std::str::FromStr for TransactionSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "statement" => Ok(Self::Statement),
            _ => Err(format!("Unknown transaction source: {}", s)),
        }
    }
}

/// Visibility state of an aggregate bill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillState {
    /// Visible with its original amount, available as a candidate
    Open,
    /// Zeroed and hidden; its itemized rows stand in for it
    Expanded,
}

impl BillState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Expanded => "expanded",
        }
    }
}

impl std::str::FromStr for BillState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "expanded" => Ok(Self::Expanded),
            _ => Err(format!("Unknown bill state: {}", s)),
        }
    }
}

/// A ledger transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub account_id: Option<i64>,
    pub date: NaiveDate,
    pub description: String,
    /// Magnitude; direction is `kind`
    pub amount: Decimal,
    pub kind: TransactionKind,
    pub category_id: Option<i64>,
    pub category: Option<String>,
    pub category_kind: Option<CategoryKind>,
    /// Hidden rows are excluded from spend (expanded bills, payment markers)
    pub is_hidden: bool,
    /// Only set for aggregate card bills
    pub bill_state: Option<BillState>,
    /// For an expanded bill: its amount before expansion.
    /// For an itemized row: the bill amount at expand time.
    pub original_amount: Option<Decimal>,
    pub billing_cycle: Option<String>,
    /// Back-reference from an itemized row to the bill it replaced
    pub credit_card_payment_id: Option<i64>,
    pub installment_current: Option<u32>,
    pub installment_total: Option<u32>,
    pub source: TransactionSource,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn is_card_bill(&self) -> bool {
        self.category_kind == Some(CategoryKind::CardBill)
    }
}

/// A new ledger transaction (before DB insertion)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransaction {
    pub account_id: Option<i64>,
    pub date: NaiveDate,
    pub description: String,
    /// Signed amount: positive = expense, negative = income
    pub amount: Decimal,
    pub category_id: Option<i64>,
}

/// One normalized line of a card statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementLine {
    pub date: NaiveDate,
    pub description: String,
    /// Positive = expense, negative = payment/refund
    pub amount: Decimal,
    #[serde(default)]
    pub installment_current: Option<u32>,
    #[serde(default)]
    pub installment_total: Option<u32>,
    #[serde(default)]
    pub is_payment_marker: bool,
}

/// Derived totals for a set of statement lines
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleTotals {
    /// Sum of |amount| over non-marker lines
    pub total_amount: Decimal,
    /// Non-marker line count
    pub transaction_count: usize,
    pub oldest_date: Option<NaiveDate>,
    pub newest_date: Option<NaiveDate>,
    /// Newest payment-marker date
    pub marker_date: Option<NaiveDate>,
}

/// Reconciliation state of a billing cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    /// Waiting for the next reconciliation pass
    Pending,
    /// Several candidates; needs a manual choice
    AwaitingSelection,
    /// No candidate bill; waits for new data
    NoMatch,
    Linked,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AwaitingSelection => "awaiting_selection",
            Self::NoMatch => "no_match",
            Self::Linked => "linked",
        }
    }
}

impl std::str::FromStr for CycleStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "awaiting_selection" => Ok(Self::AwaitingSelection),
            "no_match" => Ok(Self::NoMatch),
            "linked" => Ok(Self::Linked),
            _ => Err(format!("Unknown cycle status: {}", s)),
        }
    }
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One statement period of a card account, identified by "YYYY-MM"
#[derive(Debug, Clone, Serialize)]
pub struct BillingCycle {
    pub id: i64,
    pub account_id: i64,
    pub billing_cycle: String,
    pub status: CycleStatus,
    pub total_amount: Decimal,
    pub transaction_count: i64,
    pub oldest_date: Option<NaiveDate>,
    pub newest_date: Option<NaiveDate>,
    pub marker_date: Option<NaiveDate>,
    /// Candidate snapshot from the last matching attempt
    pub potential_matches: Vec<MatchCandidate>,
    pub link: Option<CycleLink>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A billing cycle with its stored lines
#[derive(Debug, Clone, Serialize)]
pub struct CycleDetail {
    #[serde(flatten)]
    pub cycle: BillingCycle,
    pub lines: Vec<StatementLine>,
}

/// Active association between a cycle and the bill it replaced
#[derive(Debug, Clone, Serialize)]
pub struct CycleLink {
    pub id: i64,
    pub cycle_id: i64,
    pub bill_transaction_id: i64,
    pub cycle_total: Decimal,
    pub bill_amount: Decimal,
    /// cycle_total - bill_amount
    pub amount_difference: Decimal,
    pub difference_percent: Decimal,
    pub has_mismatch: bool,
    /// Linked past the reject threshold
    pub forced: bool,
    pub linked_transaction_count: i64,
    pub linked_at: DateTime<Utc>,
}

/// Confidence tier of a candidate bill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchConfidence {
    Exact,
    High,
    Medium,
    Low,
}

impl MatchConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl std::fmt::Display for MatchConfidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A bill scored against a cycle total
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub bill_id: i64,
    pub date: NaiveDate,
    pub description: String,
    pub bill_amount: Decimal,
    /// cycle_total - bill_amount
    pub difference: Decimal,
    pub difference_percent: Decimal,
    pub confidence: MatchConfidence,
    pub days_from_reference: i64,
    /// Ranking score; lower is better
    pub score: Decimal,
    pub has_mismatch: bool,
    /// Within the reject threshold (linkable without force)
    pub within_tolerance: bool,
}

/// Outcome of the link selector for one cycle
#[derive(Debug, Clone, PartialEq)]
pub enum LinkDecision {
    /// Exactly one candidate within the reject threshold
    AutoLink(MatchCandidate),
    /// Needs a manual choice among these candidates
    RequiresSelection(Vec<MatchCandidate>),
    NoMatch,
}

impl LinkDecision {
    pub fn kind(&self) -> DecisionKind {
        match self {
            Self::AutoLink(_) => DecisionKind::AutoLink,
            Self::RequiresSelection(_) => DecisionKind::RequiresSelection,
            Self::NoMatch => DecisionKind::NoMatch,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    AutoLink,
    RequiresSelection,
    NoMatch,
}

/// Manual choice for a cycle awaiting selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Bill(i64),
    /// Leave the cycle pending with its candidates preserved
    KeepPending,
}

/// Line items of one cycle handed to preview / import-and-link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleImport {
    pub account_id: i64,
    /// Derived from the lines when absent
    #[serde(default)]
    pub billing_cycle: Option<String>,
    pub lines: Vec<StatementLine>,
}

/// A user-confirmed cycle to bill pairing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmedMatch {
    pub account_id: i64,
    pub billing_cycle: String,
    pub bill_id: i64,
    #[serde(default)]
    pub force: bool,
}

/// Read-only matching result for one cycle
#[derive(Debug, Clone, Serialize)]
pub struct CyclePreview {
    pub account_id: i64,
    pub billing_cycle: String,
    pub total_amount: Decimal,
    pub transaction_count: usize,
    pub decision: DecisionKind,
    pub suggested_bill_id: Option<i64>,
    pub candidates: Vec<MatchCandidate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportPreview {
    pub matches: Vec<CyclePreview>,
    pub unmatched_count: usize,
    pub total_amount: Decimal,
    pub warnings: Vec<String>,
}

/// A bill zeroed by expansion
#[derive(Debug, Clone, Serialize)]
pub struct ZeroedBill {
    pub bill_id: i64,
    pub billing_cycle: String,
    pub original_amount: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportAndLinkResult {
    pub imported_count: usize,
    pub matched_count: usize,
    pub unmatched_count: usize,
    pub zeroed_bills: Vec<ZeroedBill>,
    pub warnings: Vec<String>,
}

/// Result of expanding a bill into a cycle's lines
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkResult {
    pub account_id: i64,
    pub billing_cycle: String,
    pub bill_id: i64,
    pub transactions_linked: usize,
    pub amount_difference: Decimal,
    pub difference_percent: Decimal,
    pub has_mismatch: bool,
    pub forced: bool,
}

/// Result of collapsing a bill back to its aggregate form
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollapseResult {
    pub transaction_id: i64,
    pub billing_cycle: String,
    pub restored_amount: Decimal,
    pub deleted_transaction_count: usize,
}

/// Outcome of a manual selection
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SelectionOutcome {
    Linked(LinkResult),
    KeptPending {
        account_id: i64,
        billing_cycle: String,
        candidates: Vec<MatchCandidate>,
    },
}

/// Cycle reference in a reconciliation report
#[derive(Debug, Clone, Serialize)]
pub struct CycleRef {
    pub account_id: i64,
    pub billing_cycle: String,
    pub total_amount: Decimal,
}

/// A cycle the orchestrator could not link on its own
#[derive(Debug, Clone, Serialize)]
pub struct PendingSelection {
    pub account_id: i64,
    pub billing_cycle: String,
    pub total_amount: Decimal,
    pub candidates: Vec<MatchCandidate>,
    /// Why the cycle was not auto-linked when it had a single candidate
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconciliationSummary {
    pub examined: usize,
    pub auto_linked: usize,
    pub requires_selection: usize,
    pub no_match: usize,
    pub transactions_linked: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconciliationReport {
    pub auto_linked: Vec<LinkResult>,
    pub requires_selection: Vec<PendingSelection>,
    pub no_match: Vec<CycleRef>,
    pub summary: ReconciliationSummary,
}

impl ReconciliationReport {
    pub fn is_empty(&self) -> bool {
        self.summary.examined == 0
    }
}

/// Aggregates for a page of cycles
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleSummary {
    pub total_cycles: i64,
    pub total_amount: Decimal,
    pub awaiting_selection: i64,
    pub no_match: i64,
    pub mismatched: i64,
    pub total_difference: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct CyclePage {
    pub cycles: Vec<BillingCycle>,
    pub summary: CycleSummary,
}

/// Result of registering a statement upload as a pending cycle
#[derive(Debug, Clone, Serialize)]
pub struct StatementImport {
    pub account_id: i64,
    pub billing_cycle: String,
    pub cycle_id: i64,
    pub new_lines: usize,
    pub duplicate_lines: usize,
    pub total_amount: Decimal,
    pub status: CycleStatus,
    pub warnings: Vec<String>,
}

/// A structural problem found by the integrity scan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegrityIssue {
    pub kind: IntegrityIssueKind,
    pub bill_id: Option<i64>,
    pub cycle_id: Option<i64>,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityIssueKind {
    /// Itemized rows reference a bill without an active link
    OrphanedItemized,
    /// A link points at a bill that is not in the expanded state
    BillNotExpanded,
    /// An expanded bill has no link
    ExpandedWithoutLink,
    /// Row count differs from linked_transaction_count
    CountMismatch,
    /// Sum of visible itemized rows differs from the cycle total
    SumMismatch,
}
