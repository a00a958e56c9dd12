use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A user joined with its profile, the shape most auth flows need.
#[derive(Debug, Clone, FromRow)]
pub struct Account {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub pwd_hash: String,
    pub is_admin: bool,
    pub first_name: String,
    pub last_name: String,
    pub picture: Option<String>,
    pub is_active: bool,
    pub admin_id: Option<i64>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Company {
    pub id: i64,
    pub name: String,
    pub owner_id: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, FromRow)]
pub struct CompanyAccessGrant {
    pub id: i64,
    pub user_id: i64,
    pub company_id: i64,
    pub created_at: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct SubUser {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct LookupType {
    pub id: i64,
    pub lookup_type: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct LookupName {
    pub id: i64,
    pub lookup_type_id: i64,
    pub lookup_name: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct Tax {
    pub id: i64,
    pub lookup_name_id: i64,
    pub name: String,
    pub vat: Option<String>,
    pub ret: Option<String>,
    pub equiv: Option<String>,
    pub irpf: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct AccountType {
    pub id: i64,
    pub category_id: i64,
    pub code: String,
    pub name: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct PaymentDay {
    pub id: i64,
    pub day: i64,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct Contact {
    pub id: i64,
    pub company_id: i64,
    pub contact_type_id: i64,
    pub contact_id: String,
    pub name: String,
    pub nif: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub tax_id: Option<i64>,
    pub account_type_id: Option<i64>,
    pub payment_day_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

/// Header row shared by expenses, purchases and assets.
#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct LedgerEntry {
    pub id: i64,
    pub company_id: i64,
    pub accounting_seat: String,
    pub contact_id: i64,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub description: String,
    pub chart_of_account_id: i64,
    pub creation_date: NaiveDate,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct LedgerItem {
    pub id: i64,
    pub base_amount: String,
    pub vat_id: Option<i64>,
    pub calculated_vat: String,
    pub ret_id: Option<i64>,
    pub calculated_ret: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct Team {
    pub id: i64,
    pub company_id: i64,
    pub team_name: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct Employee {
    pub id: i64,
    pub company_id: i64,
    pub team_id: Option<i64>,
    pub name: String,
    pub nif: String,
    pub email: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct PayRoll {
    pub id: i64,
    pub company_id: i64,
    pub period: NaiveDate,
    pub description: String,
    pub creation_date: NaiveDate,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct PayRollItem {
    pub id: i64,
    pub employee_id: i64,
    pub gross_amount: String,
    pub irpf_id: Option<i64>,
    pub calculated_irpf: String,
}
