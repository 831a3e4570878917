//! Introspection against a real Postgres, started with testcontainers.
//!
//! Needs Docker: `cargo test -p dredge --features test-postgres`.

#![cfg(feature = "test-postgres")]

use dredge::{CatalogError, Error, FkAction, RelationKind};
use testcontainers::ContainerAsync;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;
use tokio_postgres::NoTls;

const SHOP_SQL: &str = r#"
CREATE SCHEMA shop;
CREATE TYPE shop.order_status AS ENUM ('pending', 'shipped');
CREATE TABLE shop.customer (
    id serial PRIMARY KEY,
    email text NOT NULL UNIQUE,
    created_at timestamptz NOT NULL DEFAULT now()
);
CREATE TABLE shop.orders (
    id serial PRIMARY KEY,
    customer_id integer NOT NULL REFERENCES shop.customer (id) ON DELETE CASCADE,
    status shop.order_status NOT NULL DEFAULT 'pending',
    note varchar(200)
);
CREATE INDEX orders_status_idx ON shop.orders (status, id DESC);
CREATE TABLE shop.product (
    id serial PRIMARY KEY,
    name text NOT NULL
);
CREATE TABLE shop.order_item (
    order_id integer NOT NULL REFERENCES shop.orders (id),
    product_id integer NOT NULL REFERENCES shop.product (id),
    PRIMARY KEY (order_id, product_id)
);
CREATE SCHEMA empty;
"#;

async fn start_postgres() -> (ContainerAsync<Postgres>, u16) {
    let container = Postgres::default().start().await.unwrap();
    let port = container.get_host_port_ipv4(5432).await.unwrap();
    (container, port)
}

fn conn_str(port: u16) -> String {
    format!(
        "host=127.0.0.1 port={} user=postgres password=postgres dbname=postgres",
        port
    )
}

async fn connect(port: u16) -> tokio_postgres::Client {
    let (client, connection) = tokio_postgres::connect(&conn_str(port), NoTls)
        .await
        .unwrap();
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            eprintln!("connection error: {}", e);
        }
    });
    client
}

#[tokio::test]
async fn test_introspect_shop_schema() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let (_container, port) = start_postgres().await;
    let client = connect(port).await;
    client.batch_execute(SHOP_SQL).await.unwrap();

    let introspection = dredge::introspect(&client, "shop").await.unwrap();
    assert_eq!(introspection.graph().junctions(), &["order_item".to_string()]);

    let dm = introspection.datamodel().unwrap();
    let models: Vec<&str> = dm.models().map(|m| m.name.as_str()).collect();
    assert_eq!(models, ["Customer", "Order", "Product"]);

    let status = dm.get_enum("OrderStatus").unwrap();
    assert_eq!(status.db_name, "order_status");
    assert_eq!(status.variants, ["pending", "shipped"]);

    let customer = dm
        .model("Order")
        .and_then(|m| m.field("customer"))
        .and_then(|f| f.as_relation())
        .unwrap();
    assert_eq!(customer.fields, ["customer_id"]);
    assert_eq!(customer.on_delete, FkAction::Cascade);

    let kinds: Vec<RelationKind> = dm.relations().map(|r| r.kind).collect();
    assert_eq!(kinds.len(), 2);
    assert!(kinds.contains(&RelationKind::OneToMany));
    assert!(kinds.contains(&RelationKind::ManyToMany));

    let rendered = dm.render();
    for line in [
        "  id Int @id @default(autoincrement())",
        "  email String @unique",
        "  createdAt DateTime @default(now()) @map(\"created_at\")",
        "  orders Order[]",
        "  customer Customer @relation(fields: [customer_id], references: [id], onDelete: Cascade)",
        "  status OrderStatus @default(pending)",
        "  products Product[] @relation(through: \"order_item\")",
        "  orders Order[] @relation(through: \"order_item\")",
        "  @@index([status, id(sort: Desc)])",
        "  @@map(\"orders\")",
        "  @@map(\"order_status\")",
    ] {
        assert!(rendered.contains(line), "missing {:?} in:\n{}", line, rendered);
    }

    let again = introspection
        .datamodel_with_reference(&dredge::ReferenceDatamodel::from(&dm))
        .unwrap();
    assert_eq!(rendered, again.render());
}

#[tokio::test]
async fn test_missing_schema_and_empty_schema() {
    let (_container, port) = start_postgres().await;
    let client = connect(port).await;
    client.batch_execute(SHOP_SQL).await.unwrap();

    let err = dredge::introspect(&client, "nope").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Catalog(CatalogError::SchemaNotFound(ref schema)) if schema == "nope"
    ));

    let empty = dredge::introspect(&client, "empty").await.unwrap();
    let dm = empty.datamodel().unwrap();
    assert_eq!(dm.models().count(), 0);
    assert_eq!(dm.render(), "");
}

#[tokio::test]
async fn test_introspect_through_pool() {
    let (_container, port) = start_postgres().await;
    let client = connect(port).await;
    client.batch_execute(SHOP_SQL).await.unwrap();

    let config = deadpool_postgres::Config {
        host: Some("127.0.0.1".to_string()),
        port: Some(port),
        user: Some("postgres".to_string()),
        password: Some("postgres".to_string()),
        dbname: Some("postgres".to_string()),
        ..Default::default()
    };
    let pool = config
        .create_pool(Some(deadpool_postgres::Runtime::Tokio1), NoTls)
        .unwrap();
    let object = pool.get().await.unwrap();

    let introspector = dredge::Introspector::new(dredge::Config {
        schema: Some("shop".to_string()),
        naming: None,
    });
    let from_pool = introspector.introspect(&object).await.unwrap();
    let from_client = dredge::introspect(&client, "shop").await.unwrap();

    assert_eq!(
        from_pool.datamodel().unwrap().render(),
        from_client.datamodel().unwrap().render()
    );
}
