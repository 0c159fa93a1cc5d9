//! Statement generation tests for rivven-sqlsink dialects

use rivven_sqlsink::prelude::*;

fn int(name: &str) -> FieldSpec {
    FieldSpec::new(name, FieldType::Int32)
}

fn key(name: &str) -> FieldSpec {
    FieldSpec::key(name, FieldType::Int32)
}

// ============================================================================
// CREATE TABLE
// ============================================================================

#[test]
fn test_create_table_composite_key() {
    let sql = PostgresDialect
        .create_table_sql(
            "tableA",
            &[
                key("userid"),
                key("userdataid"),
                FieldSpec::new("info", FieldType::String),
            ],
        )
        .unwrap();

    assert_eq!(
        sql,
        "CREATE TABLE \"tableA\" (\"userid\" INT NOT NULL,\"userdataid\" INT NOT NULL,\"info\" TEXT NULL,PRIMARY KEY(\"userid\",\"userdataid\"))"
    );
}

#[test]
fn test_create_table_single_key_property() {
    let dialects: [&dyn SqlDialect; 4] = [
        &PostgresDialect,
        &MySqlDialect,
        &SqlServerDialect,
        &SqliteDialect,
    ];
    let fields = vec![
        FieldSpec::new("a", FieldType::String),
        FieldSpec::key("id", FieldType::Int64),
        FieldSpec::new("b", FieldType::Float64),
        FieldSpec::new("c", FieldType::Boolean),
    ];

    for dialect in dialects {
        let sql = dialect.create_table_sql("t", &fields).unwrap();
        assert_eq!(sql.matches("PRIMARY KEY(").count(), 1, "{}", sql);
        assert!(
            sql.contains(&format!("PRIMARY KEY({})", dialect.quote_identifier("id"))),
            "{}",
            sql
        );
        assert_eq!(sql.matches("NOT NULL").count(), 1, "{}", sql);
        assert_eq!(sql.matches(" NULL").count(), 4, "{}", sql);
    }
}

#[test]
fn test_create_table_without_key() {
    let sql = PostgresDialect
        .create_table_sql("events", &[int("a"), FieldSpec::new("b", FieldType::Bytes)])
        .unwrap();

    assert_eq!(
        sql,
        "CREATE TABLE \"events\" (\"a\" INT NULL,\"b\" BYTEA NULL)"
    );
    assert!(!sql.contains("PRIMARY KEY"));
    assert!(!sql.contains("NOT NULL"));
}

#[test]
fn test_create_table_follows_input_order() {
    let sql = SqliteDialect
        .create_table_sql("t", &[int("z"), key("a"), int("m")])
        .unwrap();
    let z = sql.find("\"z\"").unwrap();
    let a = sql.find("\"a\"").unwrap();
    let m = sql.find("\"m\"").unwrap();
    assert!(z < a && a < m);
}

#[test]
fn test_create_table_invalid_arguments() {
    assert!(matches!(
        PostgresDialect.create_table_sql("t", &[]),
        Err(Error::InvalidArgument { .. })
    ));
    assert!(matches!(
        PostgresDialect.create_table_sql("  ", &[int("a")]),
        Err(Error::InvalidArgument { .. })
    ));
}

#[test]
fn test_nested_types_stored_as_text() {
    let fields = [
        FieldSpec::key("id", FieldType::Int64),
        FieldSpec::new("address", FieldType::Struct),
        FieldSpec::new("tags", FieldType::Array),
        FieldSpec::new("attrs", FieldType::Map),
    ];

    assert_eq!(
        PostgresDialect.create_table_sql("t", &fields).unwrap(),
        "CREATE TABLE \"t\" (\"id\" BIGINT NOT NULL,\"address\" TEXT NULL,\"tags\" TEXT NULL,\"attrs\" TEXT NULL,PRIMARY KEY(\"id\"))"
    );

    for field_type in [FieldType::Struct, FieldType::Array, FieldType::Map] {
        assert_eq!(PostgresDialect.map_type(field_type).unwrap(), "TEXT");
        assert_eq!(MySqlDialect.map_type(field_type).unwrap(), "VARCHAR(256)");
        assert_eq!(SqlServerDialect.map_type(field_type).unwrap(), "VARCHAR(MAX)");
        assert_eq!(SqliteDialect.map_type(field_type).unwrap(), "TEXT");
    }
}

#[test]
fn test_nested_primary_key_unsupported() {
    let err = PostgresDialect
        .create_table_sql("t", &[FieldSpec::key("payload", FieldType::Struct)])
        .unwrap_err();
    assert!(matches!(
        err,
        Error::UnsupportedType { ref type_name, dialect: "PostgreSQL" }
            if type_name == "struct primary key 'payload'"
    ));

    // As a plain column the same type is accepted
    assert!(PostgresDialect
        .create_table_sql("t", &[FieldSpec::new("payload", FieldType::Struct)])
        .is_ok());
}

// ============================================================================
// ALTER TABLE
// ============================================================================

#[test]
fn test_alter_table_single_statement() {
    let statements = PostgresDialect
        .alter_table_sql(
            "users",
            &[
                FieldSpec::new("email", FieldType::String),
                FieldSpec::new("age", FieldType::Int16),
            ],
        )
        .unwrap();

    assert_eq!(
        statements,
        vec![
            "ALTER TABLE \"users\" ADD COLUMN \"email\" TEXT NULL, ADD COLUMN \"age\" SMALLINT NULL"
                .to_string()
        ]
    );
}

#[test]
fn test_alter_table_added_columns_are_nullable() {
    // Even key fields are added as nullable columns
    let statements = MySqlDialect
        .alter_table_sql("users", &[FieldSpec::key("tenant", FieldType::Int32)])
        .unwrap();
    assert_eq!(
        statements,
        vec!["ALTER TABLE `users` ADD COLUMN `tenant` INT NULL".to_string()]
    );
}

#[test]
fn test_alter_table_sqlite_one_per_column() {
    let statements = SqliteDialect
        .alter_table_sql("users", &[int("a"), FieldSpec::new("b", FieldType::String)])
        .unwrap();
    assert_eq!(
        statements,
        vec![
            "ALTER TABLE \"users\" ADD COLUMN \"a\" INTEGER NULL".to_string(),
            "ALTER TABLE \"users\" ADD COLUMN \"b\" TEXT NULL".to_string(),
        ]
    );
}

#[test]
fn test_alter_table_sqlserver() {
    let statements = SqlServerDialect
        .alter_table_sql("users", &[int("a"), FieldSpec::new("b", FieldType::Boolean)])
        .unwrap();
    assert_eq!(
        statements,
        vec!["ALTER TABLE [users] ADD [a] INT NULL, [b] BIT NULL".to_string()]
    );
}

#[test]
fn test_alter_table_invalid_arguments() {
    assert!(PostgresDialect.alter_table_sql("t", &[]).is_err());
    assert!(PostgresDialect.alter_table_sql("", &[int("a")]).is_err());
}

// ============================================================================
// INSERT / UPSERT
// ============================================================================

#[test]
fn test_insert() {
    let sql = PostgresDialect
        .insert_sql("Customer", &["id", "name"])
        .unwrap();
    assert_eq!(sql, "INSERT INTO \"Customer\" (\"id\",\"name\") VALUES (?,?)");
}

#[test]
fn test_postgres_upsert() {
    let sql = PostgresDialect
        .upsert_sql("Customer", &["id"], &["name", "salary", "address"])
        .unwrap();

    assert_eq!(
        sql,
        "INSERT INTO \"Customer\" (\"id\",\"name\",\"salary\",\"address\") VALUES (?,?,?,?) ON CONFLICT (\"id\") DO UPDATE SET \"name\"=EXCLUDED.\"name\",\"salary\"=EXCLUDED.\"salary\",\"address\"=EXCLUDED.\"address\""
    );
}

#[test]
fn test_postgres_upsert_keys_only() {
    let sql = PostgresDialect.upsert_sql("t", &["a", "b"], &[]).unwrap();
    assert_eq!(
        sql,
        "INSERT INTO \"t\" (\"a\",\"b\") VALUES (?,?) ON CONFLICT (\"a\",\"b\") DO NOTHING"
    );
}

#[test]
fn test_mysql_upsert() {
    let sql = MySqlDialect
        .upsert_sql("Customer", &["id"], &["name", "salary"])
        .unwrap();
    assert_eq!(
        sql,
        "INSERT INTO `Customer` (`id`,`name`,`salary`) VALUES (?,?,?) ON DUPLICATE KEY UPDATE `name`=VALUES(`name`),`salary`=VALUES(`salary`)"
    );
}

#[test]
fn test_sqlserver_upsert() {
    let sql = SqlServerDialect
        .upsert_sql("Customer", &["id"], &["name"])
        .unwrap();
    assert_eq!(
        sql,
        "MERGE INTO [Customer] WITH (HOLDLOCK) AS target USING (SELECT ? AS [id],? AS [name]) AS incoming ON (target.[id]=incoming.[id]) WHEN MATCHED THEN UPDATE SET [name]=incoming.[name] WHEN NOT MATCHED THEN INSERT ([id],[name]) VALUES (incoming.[id],incoming.[name]);"
    );
}

#[test]
fn test_sqlite_upsert() {
    let sql = SqliteDialect.upsert_sql("t", &["id"], &["v"]).unwrap();
    assert_eq!(
        sql,
        "INSERT INTO \"t\" (\"id\",\"v\") VALUES (?,?) ON CONFLICT (\"id\") DO UPDATE SET \"v\"=EXCLUDED.\"v\""
    );
}

#[test]
fn test_upsert_invalid_arguments() {
    let dialects: [&dyn SqlDialect; 4] = [
        &PostgresDialect,
        &MySqlDialect,
        &SqlServerDialect,
        &SqliteDialect,
    ];
    for dialect in dialects {
        assert!(matches!(
            dialect.upsert_sql("t", &[], &["v"]),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            dialect.upsert_sql(" ", &["id"], &["v"]),
            Err(Error::InvalidArgument { .. })
        ));
    }
}

// ============================================================================
// Quoting
// ============================================================================

#[test]
fn test_quote_round_trip() {
    let dialects: [&dyn SqlDialect; 4] = [
        &PostgresDialect,
        &MySqlDialect,
        &SqlServerDialect,
        &SqliteDialect,
    ];
    let names = [
        "users",
        "Mixed Case",
        "with\"quote",
        "with`tick",
        "a]b[c",
        "x'; DROP TABLE users--",
        "",
    ];

    for dialect in dialects {
        for name in names {
            let quoted = dialect.quote_identifier(name);
            assert_eq!(
                dialect.unquote_identifier(&quoted).as_deref(),
                Some(name),
                "{} round trip of {:?}",
                dialect.name(),
                name
            );
        }
    }
}

#[test]
fn test_identifiers_always_quoted() {
    let sql = MySqlDialect.insert_sql("select", &["from", "where"]).unwrap();
    assert_eq!(sql, "INSERT INTO `select` (`from`,`where`) VALUES (?,?)");
}

// ============================================================================
// Type compatibility
// ============================================================================

#[test]
fn test_types_compatible_with_engine_aliases() {
    assert!(PostgresDialect.types_compatible("integer", "INT"));
    assert!(PostgresDialect.types_compatible("character varying", "TEXT"));
    assert!(PostgresDialect.types_compatible("double precision", "FLOAT"));
    assert!(!PostgresDialect.types_compatible("text", "INT"));

    assert!(MySqlDialect.types_compatible("varchar(255)", "VARCHAR(256)"));
    assert!(SqlServerDialect.types_compatible("nvarchar", "VARCHAR(MAX)"));
    assert!(SqliteDialect.types_compatible("BIGINT", "INTEGER"));
}
