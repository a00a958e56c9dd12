use serde::Deserialize;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use crate::{
    contact_id::assign_contact_id,
    db::{begin_write, delete_scoped, invalid_pk, lookup_name_of_type, require_reference},
    errors::{unique_violation_as, AppError},
    structs::{Company, Contact},
    utils::{
        contains_pattern, now_timestamp, nullable, require_non_empty, validate_email, Page,
        Pagination,
    },
};

const CONTACT_TYPE: &str = "ContactType";
const NIF_TAKEN: &str = "NIF already exists.";

#[derive(Debug, Clone, Deserialize)]
pub struct NewContact {
    pub contact_type: i64,
    pub name: String,
    pub nif: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub tax: Option<i64>,
    pub account_type: Option<i64>,
    pub payment_day: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContactPatch {
    pub contact_type: Option<i64>,
    pub name: Option<String>,
    pub nif: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub address: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub tax: Option<Option<i64>>,
    #[serde(default, deserialize_with = "nullable")]
    pub account_type: Option<Option<i64>>,
    #[serde(default, deserialize_with = "nullable")]
    pub payment_day: Option<Option<i64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContactFilter {
    pub name: Option<String>,
    pub nif: Option<String>,
    pub contact_type: Option<i64>,
}

async fn contact_type_name(
    conn: &mut SqliteConnection,
    contact_type: i64,
) -> Result<String, AppError> {
    lookup_name_of_type(conn, CONTACT_TYPE, contact_type)
        .await?
        .ok_or_else(|| invalid_pk("contact_type", contact_type))
}

async fn check_references(
    conn: &mut SqliteConnection,
    tax: Option<i64>,
    account_type: Option<i64>,
    payment_day: Option<i64>,
) -> Result<(), AppError> {
    require_reference(conn, "taxes", "tax", tax).await?;
    require_reference(conn, "account_types", "account_type", account_type).await?;
    require_reference(conn, "payment_days", "payment_day", payment_day).await?;
    Ok(())
}

async fn nif_taken(
    conn: &mut SqliteConnection,
    company_id: i64,
    nif: &str,
    except_id: Option<i64>,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM contacts WHERE company_id = ? AND nif = ? AND id != ?)",
    )
    .bind(company_id)
    .bind(nif)
    .bind(except_id.unwrap_or(-1))
    .fetch_one(&mut *conn)
    .await
}

async fn fetch_contact(
    conn: &mut SqliteConnection,
    company_id: i64,
    id: i64,
) -> Result<Option<Contact>, sqlx::Error> {
    sqlx::query_as::<_, Contact>("SELECT * FROM contacts WHERE id = ? AND company_id = ?")
        .bind(id)
        .bind(company_id)
        .fetch_optional(&mut *conn)
        .await
}

fn validate_optional_email(email: Option<&str>) -> Result<(), AppError> {
    match email {
        Some(email) if !email.trim().is_empty() => validate_email(email),
        _ => Ok(()),
    }
}

pub async fn create_contact(
    pool: &SqlitePool,
    company: &Company,
    input: NewContact,
) -> Result<Contact, AppError> {
    require_non_empty("name", &input.name)?;
    require_non_empty("nif", &input.nif)?;
    validate_optional_email(input.email.as_deref())?;
    let nif = input.nif.trim().to_uppercase();

    let mut tx = begin_write(pool).await?;
    let type_name = contact_type_name(&mut tx, input.contact_type).await?;
    check_references(&mut tx, input.tax, input.account_type, input.payment_day).await?;
    if nif_taken(&mut tx, company.id, &nif, None).await? {
        return Err(AppError::validation("nif", NIF_TAKEN));
    }
    let contact_id = assign_contact_id(&mut tx, &type_name).await?;

    let now = now_timestamp();
    let contact = sqlx::query_as::<_, Contact>(
        "INSERT INTO contacts (company_id, contact_type_id, contact_id, name, nif, email, phone, address, \
         tax_id, account_type_id, payment_day_id, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
    )
    .bind(company.id)
    .bind(input.contact_type)
    .bind(&contact_id)
    .bind(input.name.trim())
    .bind(&nif)
    .bind(&input.email)
    .bind(&input.phone)
    .bind(&input.address)
    .bind(input.tax)
    .bind(input.account_type)
    .bind(input.payment_day)
    .bind(&now)
    .bind(&now)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| unique_violation_as(e, "nif", NIF_TAKEN))?;
    tx.commit().await?;

    log::info!(
        "Contact {} ({}) created in company {}",
        contact.id,
        contact.contact_id,
        company.id
    );
    Ok(contact)
}

/// Applies a partial update. The accounting code is regenerated only when the
/// contact type changes.
pub async fn update_contact(
    pool: &SqlitePool,
    company: &Company,
    id: i64,
    patch: ContactPatch,
) -> Result<Contact, AppError> {
    let mut tx = begin_write(pool).await?;
    let old = fetch_contact(&mut tx, company.id, id)
        .await?
        .ok_or_else(|| AppError::not_found("Contact"))?;

    let name = match patch.name {
        Some(name) => {
            require_non_empty("name", &name)?;
            name.trim().to_owned()
        }
        None => old.name.clone(),
    };
    let nif = match patch.nif {
        Some(nif) => {
            require_non_empty("nif", &nif)?;
            nif.trim().to_uppercase()
        }
        None => old.nif.clone(),
    };
    if nif != old.nif && nif_taken(&mut tx, company.id, &nif, Some(old.id)).await? {
        return Err(AppError::validation("nif", NIF_TAKEN));
    }
    validate_optional_email(patch.email.as_ref().and_then(|email| email.as_deref()))?;

    let contact_type = patch.contact_type.unwrap_or(old.contact_type_id);
    let contact_id = if contact_type != old.contact_type_id {
        let type_name = contact_type_name(&mut tx, contact_type).await?;
        assign_contact_id(&mut tx, &type_name).await?
    } else {
        old.contact_id.clone()
    };

    // `Some(None)` clears a reference; only newly set ones are checked.
    check_references(
        &mut tx,
        patch.tax.flatten(),
        patch.account_type.flatten(),
        patch.payment_day.flatten(),
    )
    .await?;
    let tax = patch.tax.unwrap_or(old.tax_id);
    let account_type = patch.account_type.unwrap_or(old.account_type_id);
    let payment_day = patch.payment_day.unwrap_or(old.payment_day_id);

    let contact = sqlx::query_as::<_, Contact>(
        "UPDATE contacts SET contact_type_id = ?, contact_id = ?, name = ?, nif = ?, email = ?, phone = ?, \
         address = ?, tax_id = ?, account_type_id = ?, payment_day_id = ?, updated_at = ? \
         WHERE id = ? AND company_id = ? RETURNING *",
    )
    .bind(contact_type)
    .bind(&contact_id)
    .bind(&name)
    .bind(&nif)
    .bind(patch.email.unwrap_or(old.email))
    .bind(patch.phone.unwrap_or(old.phone))
    .bind(patch.address.unwrap_or(old.address))
    .bind(tax)
    .bind(account_type)
    .bind(payment_day)
    .bind(now_timestamp())
    .bind(old.id)
    .bind(company.id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| unique_violation_as(e, "nif", NIF_TAKEN))?;
    tx.commit().await?;

    log::info!("Contact {} updated in company {}", contact.id, company.id);
    Ok(contact)
}

pub async fn get_contact(pool: &SqlitePool, company_id: i64, id: i64) -> Result<Contact, AppError> {
    let mut conn = pool.acquire().await?;
    fetch_contact(&mut conn, company_id, id)
        .await?
        .ok_or_else(|| AppError::not_found("Contact"))
}

fn push_filters(query: &mut QueryBuilder<'_, Sqlite>, company_id: i64, filter: &ContactFilter) {
    query.push(" WHERE company_id = ");
    query.push_bind(company_id);
    if let Some(name) = filter.name.as_deref().filter(|n| !n.trim().is_empty()) {
        query.push(" AND name LIKE ");
        query.push_bind(contains_pattern(name.trim()));
        query.push(" ESCAPE '\\'");
    }
    if let Some(nif) = filter.nif.as_deref().filter(|n| !n.trim().is_empty()) {
        query.push(" AND nif = ");
        query.push_bind(nif.trim().to_uppercase());
    }
    if let Some(contact_type) = filter.contact_type {
        query.push(" AND contact_type_id = ");
        query.push_bind(contact_type);
    }
}

pub async fn list_contacts(
    pool: &SqlitePool,
    company_id: i64,
    filter: &ContactFilter,
    page: &Pagination,
) -> Result<Page<Contact>, sqlx::Error> {
    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM contacts");
    push_filters(&mut count, company_id, filter);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut query = QueryBuilder::new("SELECT * FROM contacts");
    push_filters(&mut query, company_id, filter);
    query.push(" ORDER BY id DESC LIMIT ");
    query.push_bind(page.limit());
    query.push(" OFFSET ");
    query.push_bind(page.offset());
    let results = query.build_query_as::<Contact>().fetch_all(pool).await?;

    Ok(Page {
        count: total,
        results,
    })
}

pub async fn delete_contacts(pool: &SqlitePool, company_id: i64, ids: &[i64]) -> Result<u64, AppError> {
    Ok(delete_scoped(pool, "contacts", "company_id", company_id, ids).await?)
}

async fn contacts_of_type(
    pool: &SqlitePool,
    company_id: i64,
    type_name: &str,
) -> Result<Vec<Contact>, sqlx::Error> {
    sqlx::query_as::<_, Contact>(
        "SELECT c.* FROM contacts c JOIN lookup_names ln ON ln.id = c.contact_type_id \
         WHERE c.company_id = ? AND ln.lookup_name = ? ORDER BY c.id DESC",
    )
    .bind(company_id)
    .bind(type_name)
    .fetch_all(pool)
    .await
}

/// Providers or creditors for the expense form; any other lookup yields nothing.
pub async fn list_contacts_for_expense(
    pool: &SqlitePool,
    company_id: i64,
    lookup: &str,
) -> Result<Vec<Contact>, sqlx::Error> {
    match lookup.to_lowercase().as_str() {
        "provider" => contacts_of_type(pool, company_id, "Provider").await,
        "creditor" => contacts_of_type(pool, company_id, "Creditor").await,
        _ => Ok(Vec::new()),
    }
}

pub async fn list_clients(pool: &SqlitePool, company_id: i64) -> Result<Vec<Contact>, sqlx::Error> {
    contacts_of_type(pool, company_id, "Client").await
}

/// A client of the company, for the invoice form.
pub async fn get_client(pool: &SqlitePool, company_id: i64, id: i64) -> Result<Contact, AppError> {
    sqlx::query_as::<_, Contact>(
        "SELECT c.* FROM contacts c JOIN lookup_names ln ON ln.id = c.contact_type_id \
         WHERE c.id = ? AND c.company_id = ? AND ln.lookup_name = 'Client'",
    )
    .bind(id)
    .bind(company_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("Client"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::join_all;

    use crate::test_utils::{
        concurrent_test_state, seed_admin, seed_company, test_state, CLIENT, PROVIDER,
    };

    pub(crate) fn new_contact(nif: &str, contact_type: i64) -> NewContact {
        NewContact {
            contact_type,
            name: format!("Contact {nif}"),
            nif: nif.to_owned(),
            email: None,
            phone: None,
            address: None,
            tax: None,
            account_type: None,
            payment_day: None,
        }
    }

    async fn count_contacts(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM contacts")
            .fetch_one(pool)
            .await
            .expect("count")
    }

    #[tokio::test]
    async fn duplicate_nif_in_same_company_is_rejected() {
        let (state, _) = test_state().await;
        let admin = seed_admin(&state, "owner").await;
        let acme = seed_company(&state, admin.id, "Acme").await;
        let globex = seed_company(&state, admin.id, "Globex").await;
        let pool = &state.db_pool;

        create_contact(pool, &acme, new_contact("B12345678", CLIENT))
            .await
            .expect("first");
        let second = create_contact(pool, &acme, new_contact("b12345678", PROVIDER)).await;
        assert!(matches!(
            second,
            Err(AppError::Validation { ref field, .. }) if field == "nif"
        ));
        assert_eq!(count_contacts(pool).await, 1);

        create_contact(pool, &globex, new_contact("B12345678", CLIENT))
            .await
            .expect("same nif in another company");
        assert_eq!(count_contacts(pool).await, 2);
    }

    #[tokio::test]
    async fn rejected_create_does_not_burn_a_sequence_number() {
        let (state, _) = test_state().await;
        let admin = seed_admin(&state, "owner").await;
        let acme = seed_company(&state, admin.id, "Acme").await;
        let pool = &state.db_pool;

        let mut bad = new_contact("X1", CLIENT);
        bad.tax = Some(9999);
        assert!(create_contact(pool, &acme, bad).await.is_err());

        let contact = create_contact(pool, &acme, new_contact("X1", CLIENT))
            .await
            .expect("create");
        assert_eq!(contact.contact_id, "43000001");
    }

    #[tokio::test]
    async fn contact_id_changes_only_with_contact_type() {
        let (state, _) = test_state().await;
        let admin = seed_admin(&state, "owner").await;
        let acme = seed_company(&state, admin.id, "Acme").await;
        let pool = &state.db_pool;

        let client = create_contact(pool, &acme, new_contact("A1", CLIENT))
            .await
            .expect("client");
        let other_provider = create_contact(pool, &acme, new_contact("A2", PROVIDER))
            .await
            .expect("provider");

        let renamed = update_contact(
            pool,
            &acme,
            client.id,
            ContactPatch {
                name: Some("Renamed".to_owned()),
                contact_type: Some(CLIENT),
                ..ContactPatch::default()
            },
        )
        .await
        .expect("rename");
        assert_eq!(renamed.contact_id, client.contact_id);
        assert_eq!(renamed.name, "Renamed");

        let retyped = update_contact(
            pool,
            &acme,
            client.id,
            ContactPatch {
                contact_type: Some(PROVIDER),
                ..ContactPatch::default()
            },
        )
        .await
        .expect("retype");
        assert_ne!(retyped.contact_id, client.contact_id);
        assert_ne!(retyped.contact_id, other_provider.contact_id);
        assert!(retyped.contact_id.starts_with("4000"));
    }

    #[tokio::test]
    async fn null_clears_optional_fields_and_missing_keys_keep_them() {
        let (state, _) = test_state().await;
        let admin = seed_admin(&state, "owner").await;
        let acme = seed_company(&state, admin.id, "Acme").await;
        let pool = &state.db_pool;

        let contact = create_contact(
            pool,
            &acme,
            NewContact {
                email: Some("billing@client.es".to_owned()),
                phone: Some("600111222".to_owned()),
                tax: Some(2),
                ..new_contact("K1", CLIENT)
            },
        )
        .await
        .expect("contact");
        assert_eq!(contact.tax_id, Some(2));

        let patch: ContactPatch =
            serde_json::from_str(r#"{"email": null, "tax": null}"#).expect("patch");
        let cleared = update_contact(pool, &acme, contact.id, patch).await.expect("clear");
        assert_eq!(cleared.email, None);
        assert_eq!(cleared.tax_id, None);
        assert_eq!(cleared.phone.as_deref(), Some("600111222"));

        let patch: ContactPatch = serde_json::from_str(r#"{"tax": 999}"#).expect("patch");
        assert!(matches!(
            update_contact(pool, &acme, contact.id, patch).await,
            Err(AppError::Validation { ref field, .. }) if field == "tax"
        ));
    }

    #[tokio::test]
    async fn update_rejects_nif_of_another_contact() {
        let (state, _) = test_state().await;
        let admin = seed_admin(&state, "owner").await;
        let acme = seed_company(&state, admin.id, "Acme").await;
        let pool = &state.db_pool;

        create_contact(pool, &acme, new_contact("N1", CLIENT)).await.expect("n1");
        let second = create_contact(pool, &acme, new_contact("N2", CLIENT)).await.expect("n2");

        let clash = update_contact(
            pool,
            &acme,
            second.id,
            ContactPatch {
                nif: Some("N1".to_owned()),
                ..ContactPatch::default()
            },
        )
        .await;
        assert!(matches!(clash, Err(AppError::Validation { .. })));

        let same = update_contact(
            pool,
            &acme,
            second.id,
            ContactPatch {
                nif: Some("N2".to_owned()),
                ..ContactPatch::default()
            },
        )
        .await
        .expect("keeping own nif");
        assert_eq!(same.nif, "N2");
    }

    #[tokio::test]
    async fn bulk_delete_ignores_other_companies_rows() {
        let (state, _) = test_state().await;
        let admin = seed_admin(&state, "owner").await;
        let acme = seed_company(&state, admin.id, "Acme").await;
        let globex = seed_company(&state, admin.id, "Globex").await;
        let pool = &state.db_pool;

        let mine = create_contact(pool, &acme, new_contact("M1", CLIENT)).await.expect("mine");
        let theirs = create_contact(pool, &globex, new_contact("T1", CLIENT))
            .await
            .expect("theirs");

        let deleted = delete_contacts(pool, acme.id, &[mine.id, theirs.id])
            .await
            .expect("delete");
        assert_eq!(deleted, 1);
        assert!(get_contact(pool, globex.id, theirs.id).await.is_ok());
        assert!(matches!(
            get_contact(pool, acme.id, mine.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn listing_filters_and_orders_by_recency() {
        let (state, _) = test_state().await;
        let admin = seed_admin(&state, "owner").await;
        let acme = seed_company(&state, admin.id, "Acme").await;
        let pool = &state.db_pool;

        let first = create_contact(pool, &acme, new_contact("L1", CLIENT)).await.expect("l1");
        let second = create_contact(pool, &acme, new_contact("L2", PROVIDER)).await.expect("l2");

        let page = list_contacts(pool, acme.id, &ContactFilter::default(), &Pagination::default())
            .await
            .expect("list");
        let ids: Vec<i64> = page.results.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);

        let providers = list_contacts_for_expense(pool, acme.id, "provider")
            .await
            .expect("providers");
        assert_eq!(providers.len(), 1);
        assert!(list_contacts_for_expense(pool, acme.id, "client")
            .await
            .expect("other")
            .is_empty());
        assert_eq!(list_clients(pool, acme.id).await.expect("clients")[0].id, first.id);
        assert!(get_client(pool, acme.id, first.id).await.is_ok());
        assert!(matches!(
            get_client(pool, acme.id, second.id).await,
            Err(AppError::NotFound(_))
        ));

        let filtered = list_contacts(
            pool,
            acme.id,
            &ContactFilter {
                contact_type: Some(PROVIDER),
                ..ContactFilter::default()
            },
            &Pagination::default(),
        )
        .await
        .expect("filtered");
        assert_eq!(filtered.count, 1);
    }

    async fn race_creates(
        pool: &SqlitePool,
        company: &Company,
        nifs: &[&str],
    ) -> Vec<Result<Contact, AppError>> {
        let tasks = nifs.iter().map(|nif| {
            let pool = pool.clone();
            let company = company.clone();
            let contact = new_contact(nif, CLIENT);
            tokio::spawn(async move { create_contact(&pool, &company, contact).await })
        });
        join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.expect("task"))
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_creates_with_one_nif_keep_one_row_and_reject_the_rest() {
        let (state, _, _dir) = concurrent_test_state().await;
        let admin = seed_admin(&state, "owner").await;
        let acme = seed_company(&state, admin.id, "Acme").await;

        for round in 0..5 {
            let nif = format!("B0000000{round}");
            let results = race_creates(&state.db_pool, &acme, &[nif.as_str(); 4]).await;
            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
            assert!(results.iter().filter_map(|r| r.as_ref().err()).all(|e| matches!(
                e,
                AppError::Validation { field, .. } if field == "nif"
            )));
        }
        assert_eq!(count_contacts(&state.db_pool).await, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_creates_with_distinct_nifs_all_succeed() {
        let (state, _, _dir) = concurrent_test_state().await;
        let admin = seed_admin(&state, "owner").await;
        let acme = seed_company(&state, admin.id, "Acme").await;

        let nifs = ["C1", "C2", "C3", "C4", "C5", "C6", "C7", "C8"];
        let results = race_creates(&state.db_pool, &acme, &nifs).await;
        for result in &results {
            assert!(result.is_ok(), "{result:?}");
        }
        let mut ids: Vec<String> = results
            .into_iter()
            .filter_map(Result::ok)
            .map(|contact| contact.contact_id)
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), nifs.len());
        assert_eq!(count_contacts(&state.db_pool).await, 8);
    }
}
