//! Basic usage example of the cache engine.

use async_trait::async_trait;
use cache_through::{
    error::Result, AllFinder, ByIdDeleter, Cache, CacheEntity, Context, InMemoryRepository,
    QueryKey, Source, Updater,
};
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

/// Example entity: Employment
#[derive(Clone, Serialize, Deserialize, Debug)]
struct Employment {
    id: u32,
    loanapp_id: String,
    employer_name: String,
    salary: f64,
}

impl CacheEntity for Employment {
    type Id = u32;

    fn cache_id(&self) -> Self::Id {
        self.id
    }

    fn cache_prefix() -> &'static str {
        "employment"
    }
}

/// Mock table that simulates database access
struct EmploymentTable {
    rows: DashMap<u32, Employment>,
}

impl EmploymentTable {
    fn seeded() -> Self {
        let rows = DashMap::new();
        for (id, loanapp_id, employer_name, salary) in [
            (1, "loan_123", "Acme Corp", 75000.0),
            (2, "loan_456", "Tech Inc", 95000.0),
            (3, "loan_456", "Side Gig LLC", 12000.0),
        ] {
            rows.insert(
                id,
                Employment {
                    id,
                    loanapp_id: loanapp_id.to_string(),
                    employer_name: employer_name.to_string(),
                    salary,
                },
            );
        }
        EmploymentTable { rows }
    }

    async fn find_by_loanapp(&self, loanapp_id: &str) -> Result<Vec<Employment>> {
        println!("  [DB] Fetching employments of {}", loanapp_id);
        let mut found: Vec<Employment> = self
            .rows
            .iter()
            .filter(|row| row.loanapp_id == loanapp_id)
            .map(|row| row.value().clone())
            .collect();
        found.sort_by_key(|e| e.id);
        Ok(found)
    }
}

#[async_trait]
impl Source<Employment> for EmploymentTable {
    async fn find_by_id(&self, _ctx: &Context, id: &u32) -> Result<Option<Employment>> {
        println!("  [DB] Fetching employment: {}", id);
        Ok(self.rows.get(id).map(|row| row.value().clone()))
    }

    fn as_updater(&self) -> Option<&dyn Updater<Employment>> {
        Some(self)
    }

    fn as_by_id_deleter(&self) -> Option<&dyn ByIdDeleter<u32>> {
        Some(self)
    }

    fn as_all_finder(&self) -> Option<&dyn AllFinder<Employment>> {
        Some(self)
    }
}

#[async_trait]
impl Updater<Employment> for EmploymentTable {
    async fn update(&self, _ctx: &Context, entity: &Employment) -> Result<()> {
        println!("  [DB] Updating employment: {}", entity.id);
        self.rows.insert(entity.id, entity.clone());
        Ok(())
    }
}

#[async_trait]
impl ByIdDeleter<u32> for EmploymentTable {
    async fn delete_by_id(&self, _ctx: &Context, id: &u32) -> Result<()> {
        println!("  [DB] Deleting employment: {}", id);
        self.rows.remove(id);
        Ok(())
    }
}

impl AllFinder<Employment> for EmploymentTable {
    fn find_all<'a>(&'a self, _ctx: &'a Context) -> BoxStream<'a, Result<Employment>> {
        println!("  [DB] Fetching all employments");
        let mut rows: Vec<Employment> = self.rows.iter().map(|row| row.value().clone()).collect();
        rows.sort_by_key(|e| e.id);
        stream::iter(rows.into_iter().map(Ok)).boxed()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Debug)
        .try_init()
        .ok();

    println!("\n=== Cache Through - Basic Example ===\n");

    // 1. Initialize cache
    println!("1. Initializing cache over the employment table...");
    let cache = Cache::new(EmploymentTable::seeded(), InMemoryRepository::new());
    let ctx = Context::new();
    println!("   ✓ Cache ready\n");

    // 2. First request - cache miss, fetch from database
    println!("2. First request for employment 1:");
    if let Some(emp) = cache.find_by_id(&ctx, &1).await? {
        println!(
            "   ✓ Employment loaded: {} from {} (${:.2})\n",
            emp.employer_name, emp.id, emp.salary
        );
    }

    // 3. Second request - cache hit
    println!("3. Second request for same employment (no [DB] line expected):");
    if let Some(emp) = cache.find_by_id(&ctx, &1).await? {
        println!("   ✓ Employment from cache: {}\n", emp.employer_name);
    }

    // 4. Missing entity - cached as not found
    println!("4. Requesting employment 99 twice:");
    for _ in 0..2 {
        let found = cache.find_by_id(&ctx, &99).await?;
        println!("   ✓ Found: {}", found.is_some());
    }
    println!();

    // 5. Custom cached query
    println!("5. Employments of loan_456 (custom query, twice):");
    let key = QueryKey::new("FindByLoanApp")
        .arg("loanapp_id", "loan_456")?
        .encode()?;
    for _ in 0..2 {
        let table = cache.source();
        let employments = cache
            .cached_query_many(&ctx, &key, || table.find_by_loanapp("loan_456"))
            .await?;
        println!("   ✓ {} employments", employments.len());
    }
    println!();

    // 6. Write-through update
    println!("6. Raising salary of employment 2:");
    if let Some(mut emp) = cache.find_by_id(&ctx, &2).await? {
        emp.salary = 105000.0;
        cache.update(&ctx, &emp).await?;
    }
    if let Some(emp) = cache.find_by_id(&ctx, &2).await? {
        println!("   ✓ New salary from cache: ${:.2}\n", emp.salary);
    }

    // 7. Delete cascades through every query that returned the entity
    println!("7. Listing everything, then deleting employment 3:");
    println!("   ✓ {} employments", cache.find_all(&ctx).await?.len());
    cache.delete_by_id(&ctx, &3).await?;
    println!(
        "   ✓ Hits left: {} (FindAll and FindByLoanApp were invalidated)",
        cache.repository().hits().len()
    );
    println!("   ✓ {} employments\n", cache.find_all(&ctx).await?.len());

    println!("=== Example Complete ===\n");

    Ok(())
}
