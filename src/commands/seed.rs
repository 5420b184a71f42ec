use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OpenFlags, Transaction, params};
use tracing::info;

use crate::cli::SeedArgs;
use crate::executor::{DatabaseTarget, parse_database_url};
use crate::util::ensure_directory;

pub const BUNDLED_SCHEMA: &str = include_str!("../../database/schema.sql");

const CATEGORIES: [(&str, &str); 5] = [
    ("Electronics", "Electronic devices and accessories"),
    ("Clothing", "Fashion items and accessories"),
    ("Books", "Physical and digital books"),
    ("Home & Garden", "Home improvement and gardening items"),
    ("Sports", "Sports equipment and accessories"),
];

const ORDER_STATUSES: [&str; 5] = ["pending", "processing", "shipped", "delivered", "cancelled"];

const FIRST_NAMES: [&str; 8] = [
    "Alice", "Bruno", "Chen", "Dana", "Emeka", "Farah", "Goran", "Hana",
];
const LAST_NAMES: [&str; 8] = [
    "Anders", "Baptiste", "Costa", "Dubois", "Eze", "Fischer", "Garcia", "Haddad",
];
const PRODUCT_WORDS: [&str; 10] = [
    "Compact", "Classic", "Trail", "Smart", "Urban", "Studio", "Rapid", "Cedar", "Nova", "Summit",
];
const PRODUCT_NOUNS: [&str; 10] = [
    "Lamp", "Jacket", "Notebook", "Speaker", "Racket", "Planter", "Backpack", "Kettle", "Novel",
    "Headset",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedCounts {
    pub users: usize,
    pub products: usize,
    pub suppliers: usize,
    pub orders: usize,
}

impl SeedCounts {
    pub fn for_users(users: usize) -> Self {
        Self {
            users,
            products: users,
            suppliers: (users / 20).max(1),
            orders: users,
        }
    }
}

pub fn run(args: SeedArgs) -> Result<()> {
    let mut connection = open_for_seed(&args.database.database_url)?;
    let counts = SeedCounts::for_users(args.users);

    info!(database_url = %args.database.database_url, users = counts.users, "seeding database");
    let inserted = seed_database(&mut connection, counts)?;

    for (table, rows) in &inserted {
        println!("{table}: {rows} rows inserted");
    }
    Ok(())
}

fn open_for_seed(database_url: &str) -> Result<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_URI;
    match parse_database_url(database_url) {
        DatabaseTarget::Path(path) => {
            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                ensure_directory(parent)?;
            }
            Connection::open_with_flags(&path, flags)
                .with_context(|| format!("failed to open database: {}", path.display()))
        }
        DatabaseTarget::Uri(uri) => Connection::open_with_flags(&uri, flags)
            .with_context(|| format!("failed to open database: {uri}")),
    }
}

/// Applies the bundled schema and fills empty tables. Tables that already hold
/// rows are left untouched. Returns rows inserted per table.
pub fn seed_database(
    connection: &mut Connection,
    counts: SeedCounts,
) -> Result<Vec<(&'static str, usize)>> {
    if counts.users == 0 {
        bail!("--users must be at least 1");
    }

    connection
        .execute_batch(BUNDLED_SCHEMA)
        .context("failed to apply bundled schema")?;

    let tx = connection.transaction()?;
    let mut inserted = Vec::<(&'static str, usize)>::new();

    inserted.push(("users", fill_if_empty(&tx, "users", |tx| insert_users(tx, counts.users))?));
    inserted.push(("categories", fill_if_empty(&tx, "categories", insert_categories)?));
    inserted.push((
        "products",
        fill_if_empty(&tx, "products", |tx| insert_products(tx, counts.products))?,
    ));
    inserted.push((
        "suppliers",
        fill_if_empty(&tx, "suppliers", |tx| insert_suppliers(tx, counts.suppliers))?,
    ));
    inserted.push((
        "product_suppliers",
        fill_if_empty(&tx, "product_suppliers", insert_product_suppliers)?,
    ));
    inserted.push((
        "orders",
        fill_if_empty(&tx, "orders", |tx| insert_orders(tx, counts.orders))?,
    ));
    inserted.push(("order_items", fill_if_empty(&tx, "order_items", insert_order_items)?));
    inserted.push(("reviews", fill_if_empty(&tx, "reviews", insert_reviews)?));

    tx.commit()?;
    Ok(inserted)
}

fn fill_if_empty<F>(tx: &Transaction<'_>, table: &str, fill: F) -> Result<usize>
where
    F: FnOnce(&Transaction<'_>) -> Result<usize>,
{
    let existing: i64 = tx.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
        row.get(0)
    })?;
    if existing > 0 {
        info!(table, existing, "table already populated; skipping");
        return Ok(0);
    }

    let rows = fill(tx).with_context(|| format!("failed to populate {table}"))?;
    info!(table, rows, "table populated");
    Ok(rows)
}

fn insert_users(tx: &Transaction<'_>, count: usize) -> Result<usize> {
    let mut insert = tx.prepare(
        "INSERT INTO users(user_id, username, email, full_name, last_login, is_active)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for user_id in 1..=count {
        let (username, email, full_name) = user_identity(user_id);
        insert.execute(params![
            user_id as i64,
            username,
            email,
            full_name,
            format!("2024-{:02}-{:02} 09:{:02}:00", user_id % 12 + 1, user_id % 28 + 1, user_id % 60),
            user_id % 5 != 0,
        ])?;
    }
    Ok(count)
}

/// Deterministic identity for a user id; 938 is always `alice`.
pub fn user_identity(user_id: usize) -> (String, String, String) {
    if user_id == 938 {
        return (
            "alice".to_string(),
            "alice@example.com".to_string(),
            "Alice Anders".to_string(),
        );
    }

    let first = FIRST_NAMES[user_id % FIRST_NAMES.len()];
    let last = LAST_NAMES[(user_id / FIRST_NAMES.len()) % LAST_NAMES.len()];
    let username = format!("{}.{}{}", first.to_lowercase(), last.to_lowercase(), user_id);
    let email = format!("{username}@example.com");
    (username, email, format!("{first} {last}"))
}

fn insert_categories(tx: &Transaction<'_>) -> Result<usize> {
    let mut insert = tx.prepare("INSERT INTO categories(name, description) VALUES(?1, ?2)")?;
    for (name, description) in CATEGORIES {
        insert.execute(params![name, description])?;
    }
    Ok(CATEGORIES.len())
}

fn insert_products(tx: &Transaction<'_>, count: usize) -> Result<usize> {
    let mut insert = tx.prepare(
        "INSERT INTO products(product_id, name, description, price, category, stock_quantity)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for product_id in 1..=count {
        let name = format!(
            "{} {}",
            PRODUCT_WORDS[product_id % PRODUCT_WORDS.len()],
            PRODUCT_NOUNS[(product_id / PRODUCT_WORDS.len()) % PRODUCT_NOUNS.len()]
        );
        let (category, _) = CATEGORIES[product_id % CATEGORIES.len()];
        insert.execute(params![
            product_id as i64,
            name,
            format!("{name} from the {category} range."),
            price_cents(product_id, 1_000, 100_000) as f64 / 100.0,
            category,
            (product_id * 7 % 101) as i64,
        ])?;
    }
    Ok(count)
}

fn insert_suppliers(tx: &Transaction<'_>, count: usize) -> Result<usize> {
    let mut insert = tx.prepare(
        "INSERT INTO suppliers(supplier_id, name, contact_person, email, phone, address)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for supplier_id in 1..=count {
        let contact = format!(
            "{} {}",
            FIRST_NAMES[(supplier_id + 3) % FIRST_NAMES.len()],
            LAST_NAMES[supplier_id % LAST_NAMES.len()]
        );
        insert.execute(params![
            supplier_id as i64,
            format!("Supplier {supplier_id:03} Trading"),
            contact,
            format!("sales{supplier_id}@supplier.example.com"),
            format!("555-{:03}-{:04}", supplier_id % 1000, supplier_id * 37 % 10_000),
            format!("{} Harbour Road, Unit {supplier_id}", 10 + supplier_id),
        ])?;
    }
    Ok(count)
}

fn insert_product_suppliers(tx: &Transaction<'_>) -> Result<usize> {
    let inserted = tx.execute(
        "INSERT INTO product_suppliers(product_id, supplier_id, supply_price)
         SELECT p.product_id,
                ((p.product_id - 1) % (SELECT COUNT(*) FROM suppliers)) + 1,
                ROUND(p.price * 0.6, 2)
         FROM products p",
        [],
    )?;
    Ok(inserted)
}

fn insert_orders(tx: &Transaction<'_>, count: usize) -> Result<usize> {
    let user_count: i64 = tx.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
    if user_count == 0 {
        return Ok(0);
    }

    let mut insert = tx.prepare(
        "INSERT INTO orders(order_id, user_id, order_date, total_amount, status, shipping_address)
         VALUES(?1, ?2, ?3, 0, ?4, ?5)",
    )?;
    for order_id in 1..=count {
        let user_id = (order_id * 31 % user_count as usize) + 1;
        insert.execute(params![
            order_id as i64,
            user_id as i64,
            format!("2024-{:02}-{:02} 14:00:00", order_id % 12 + 1, order_id % 28 + 1),
            ORDER_STATUSES[order_id % ORDER_STATUSES.len()],
            format!("{} Market Street, Apt {}", order_id % 900 + 100, order_id % 40 + 1),
        ])?;
    }
    Ok(count)
}

fn insert_order_items(tx: &Transaction<'_>) -> Result<usize> {
    let product_count: i64 = tx.query_row("SELECT COUNT(*) FROM products", [], |row| row.get(0))?;
    if product_count == 0 {
        return Ok(0);
    }

    let order_ids = {
        let mut statement = tx.prepare("SELECT order_id FROM orders ORDER BY order_id")?;
        statement
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?
    };

    let mut insert = tx.prepare(
        "INSERT INTO order_items(order_id, product_id, quantity, unit_price)
         SELECT ?1, product_id, ?2, price FROM products WHERE product_id = ?3",
    )?;
    let mut inserted = 0usize;
    for order_id in &order_ids {
        let lines = (*order_id as usize % 3) + 1;
        for line in 0..lines {
            let product_id = ((*order_id as usize * 13 + line * 7) % product_count as usize) + 1;
            let quantity = (*order_id as usize + line) % 4 + 1;
            inserted += insert.execute(params![order_id, quantity as i64, product_id as i64])?;
        }
    }

    tx.execute(
        "UPDATE orders SET total_amount = COALESCE(
            (SELECT ROUND(SUM(quantity * unit_price), 2) FROM order_items
             WHERE order_items.order_id = orders.order_id), 0)",
        [],
    )?;
    Ok(inserted)
}

fn insert_reviews(tx: &Transaction<'_>) -> Result<usize> {
    let inserted = tx.execute(
        "INSERT INTO reviews(product_id, user_id, rating, comment)
         SELECT p.product_id,
                ((p.product_id * 17) % (SELECT COUNT(*) FROM users)) + 1,
                (p.product_id % 5) + 1,
                'Review of ' || p.name
         FROM products p
         WHERE EXISTS (SELECT 1 FROM users)",
        [],
    )?;
    Ok(inserted)
}

fn price_cents(seed: usize, min: usize, max: usize) -> usize {
    min + (seed * 7_919 + 104_729) % (max - min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::QueryExecutor;
    use crate::model::QueryOutcome;

    #[test]
    fn seeding_populates_every_table_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("shop.sqlite");
        let url = format!("sqlite://{}", path.display());

        let mut connection = open_for_seed(&url).unwrap();
        let first = seed_database(&mut connection, SeedCounts::for_users(1000)).unwrap();
        assert!(first.iter().all(|(_, rows)| *rows > 0), "{first:?}");

        let second = seed_database(&mut connection, SeedCounts::for_users(1000)).unwrap();
        assert!(second.iter().all(|(_, rows)| *rows == 0), "{second:?}");
        drop(connection);

        let executor = QueryExecutor::new(&url, std::time::Duration::from_millis(500));
        assert_eq!(
            executor.execute("SELECT username, email FROM users WHERE user_id = 938"),
            QueryOutcome::Rows {
                columns: vec!["username".to_string(), "email".to_string()],
                rows: vec!["('alice', 'alice@example.com')".to_string()],
            }
        );
        assert_eq!(
            executor.execute("SELECT name, description FROM categories WHERE category_id = 1"),
            QueryOutcome::Rows {
                columns: vec!["name".to_string(), "description".to_string()],
                rows: vec!["('Electronics', 'Electronic devices and accessories')".to_string()],
            }
        );
    }

    #[test]
    fn order_totals_match_their_items() {
        let mut connection = Connection::open_in_memory().unwrap();
        seed_database(&mut connection, SeedCounts::for_users(50)).unwrap();

        let mismatched: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM orders o
                 WHERE ABS(o.total_amount - (SELECT SUM(quantity * unit_price) FROM order_items i
                                             WHERE i.order_id = o.order_id)) > 0.01",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(mismatched, 0);

        let bad_ratings: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM reviews WHERE rating NOT BETWEEN 1 AND 5",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(bad_ratings, 0);
    }

    #[test]
    fn identities_are_unique() {
        let mut emails = (1..=1000)
            .map(|user_id| user_identity(user_id).1)
            .collect::<Vec<String>>();
        emails.sort();
        emails.dedup();
        assert_eq!(emails.len(), 1000);
    }

    #[test]
    fn zero_users_is_rejected() {
        let mut connection = Connection::open_in_memory().unwrap();
        assert!(seed_database(&mut connection, SeedCounts::for_users(0)).is_err());
    }
}
