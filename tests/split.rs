// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use matches::assert_matches;
use std::fs;
use std::io::Write;
use std::path::Path;

use mysqldump_splitter::{
    file_pipeline, split_dump, Config, DumpSplitter, Error, Options, CLOSING_FRAMING,
    OPENING_FRAMING,
};

const DUMP: &str = "\
-- MySQL dump 10.13  Distrib 8.0.32, for Linux (x86_64)
--
-- Host: localhost    Database: shop
-- ------------------------------------------------------

/*!40101 SET @OLD_CHARACTER_SET_CLIENT=@@CHARACTER_SET_CLIENT */;
/*!40101 SET NAMES utf8mb4 */;

--
-- Current Database: `shop`
--

CREATE DATABASE /*!32312 IF NOT EXISTS*/ `shop` /*!40100 DEFAULT CHARACTER SET utf8mb4 */;

USE `shop`;

--
-- Table structure for table `customers`
--

DROP TABLE IF EXISTS `customers`;
CREATE TABLE `customers` (
  `id` int NOT NULL AUTO_INCREMENT,
  `name` varchar(64) NOT NULL,
  PRIMARY KEY (`id`)
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;

LOCK TABLES `customers` WRITE;
INSERT INTO `customers` VALUES (1,'Ann'),(2,'Bob (the builder)'),(3,'O\\'Neil');
UNLOCK TABLES;

DROP TABLE IF EXISTS `orders`;
CREATE TABLE `orders` (
  `id` int NOT NULL,
  `customer` int NOT NULL
) ENGINE=InnoDB;

INSERT INTO `orders` (`id`,`customer`) VALUES (10,1),(11,3);
";

fn framed(body: &str) -> String {
    format!(
        "{}{}{}",
        String::from_utf8_lossy(OPENING_FRAMING),
        body,
        String::from_utf8_lossy(CLOSING_FRAMING)
    )
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_else(|e| panic!("{}: {}", path.display(), e))
}

#[test]
fn splits_per_table_with_schema_files() {
    let dir = tempfile::tempdir().unwrap();
    let options = Options::PER_TABLE
        | Options::DROP_TABLE
        | Options::DROP_TABLE_IF_EXISTS
        | Options::CREATE_TABLE;
    let stats = split_dump(Config::new(dir.path(), options), DUMP.as_bytes()).unwrap();

    let shop = dir.path().join("shop");
    assert_eq!(
        read(&shop.join("customers.sql")),
        framed(
            "INSERT INTO `customers` VALUES (1,'Ann');\n\
             INSERT INTO `customers` VALUES (2,'Bob (the builder)');\n\
             INSERT INTO `customers` VALUES (3,'O\\'Neil');\n"
        )
    );
    assert_eq!(
        read(&shop.join("orders.sql")),
        framed(
            "INSERT INTO `orders` (`id`,`customer`) VALUES (10,1);\n\
             INSERT INTO `orders` (`id`,`customer`) VALUES (11,3);\n"
        )
    );

    let schema = read(&shop.join("customers-schema.sql"));
    assert!(schema.starts_with("DROP TABLE IF EXISTS `customers`;\nCREATE TABLE `customers` (\n"));
    assert!(schema.ends_with(") ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;\n"));
    assert!(shop.join("orders-schema.sql").exists());

    assert_eq!(stats.rows, 5);
    assert_eq!(stats.statements, 9);
}

#[test]
fn splits_per_database() {
    let dir = tempfile::tempdir().unwrap();
    let options = Options::CREATE_DATABASE | Options::INSERT_IGNORE | Options::STATIC_DATABASE;
    split_dump(Config::new(dir.path(), options), DUMP.as_bytes()).unwrap();

    let entries: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(entries, vec!["shop.sql"]);

    assert_eq!(
        read(&dir.path().join("shop.sql")),
        framed(
            "CREATE DATABASE IF NOT EXISTS `shop`;\n\
             INSERT IGNORE INTO `shop`.`customers` VALUES (1,'Ann');\n\
             INSERT IGNORE INTO `shop`.`customers` VALUES (2,'Bob (the builder)');\n\
             INSERT IGNORE INTO `shop`.`customers` VALUES (3,'O\\'Neil');\n\
             INSERT IGNORE INTO `shop`.`orders` (`id`,`customer`) VALUES (10,1);\n\
             INSERT IGNORE INTO `shop`.`orders` (`id`,`customer`) VALUES (11,3);\n"
        )
    );
}

#[test]
fn small_pool_keeps_every_row() {
    let mut dump = String::from("USE `big`;\n");
    for i in 0..200 {
        dump.push_str(&format!("INSERT INTO `t{}` VALUES ({});\n", i % 13, i));
    }

    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::new(dir.path(), Options::PER_TABLE);
    config.max_open_files = 3;
    let stats = split_dump(config, dump.as_bytes()).unwrap();
    assert!(stats.pool.evicted > 0);

    for t in 0..13 {
        let content = read(&dir.path().join(format!("big/t{}.sql", t)));
        let rows = content.lines().filter(|l| l.starts_with("INSERT")).count();
        let expected = (0..200).filter(|i| i % 13 == t).count();
        assert_eq!(rows, expected, "table t{}", t);
        // every reopen adds one more framing pair, never an unpaired one
        assert_eq!(
            content.matches("SET FOREIGN_KEY_CHECKS=0;").count(),
            content.matches("SET FOREIGN_KEY_CHECKS=1;").count()
        );
        assert!(content.ends_with("SET FOREIGN_KEY_CHECKS=1;\n"));
    }
}

#[test]
fn reads_through_file_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("dump.sql");
    fs::File::create(&input)
        .unwrap()
        .write_all(DUMP.as_bytes())
        .unwrap();

    let out = dir.path().join("out");
    let mut splitter = DumpSplitter::new(Config::new(&out, Options::PER_TABLE)).unwrap();
    let (reader, producer) = file_pipeline(&input, 64).unwrap();
    splitter.process(reader).unwrap();
    assert_eq!(producer.join().unwrap().unwrap(), DUMP.len() as u64);
    splitter.finish().unwrap();

    assert!(read(&out.join("shop/customers.sql")).contains("(3,'O\\'Neil');\n"));
    assert!(read(&out.join("shop/orders.sql")).contains("(11,3);\n"));
}

#[test]
fn crlf_dumps_are_split_too() {
    let dump = DUMP.replace('\n', "\r\n");
    let dir = tempfile::tempdir().unwrap();
    split_dump(Config::new(dir.path(), Options::PER_TABLE), dump.as_bytes()).unwrap();
    let content = read(&dir.path().join("shop/orders.sql"));
    assert!(content.contains("INSERT INTO `orders` (`id`,`customer`) VALUES (11,3);\n"));
}

#[test]
fn insert_without_database_fails() {
    let dir = tempfile::tempdir().unwrap();
    let err = split_dump(
        Config::new(dir.path(), Options::PER_TABLE),
        &b"INSERT INTO `t` VALUES (1);\n"[..],
    )
    .unwrap_err();
    assert_matches!(err, Error::Statement { index: 1, .. });
}

#[test]
fn routines_and_indexes_do_not_stop_the_split() {
    let dump = "USE `d`;\n\
        INSERT INTO `t` VALUES (1);\n\
        CREATE INDEX `i` ON `t` (`a`);\n\
        CREATE DEFINER=`root`@`localhost` PROCEDURE `p`() SELECT 1;\n\
        INSERT INTO `t` VALUES (2);\n";
    let dir = tempfile::tempdir().unwrap();
    let stats = split_dump(Config::new(dir.path(), Options::PER_TABLE), dump.as_bytes()).unwrap();
    assert_eq!(stats.ignored, 2);
    assert_eq!(
        read(&dir.path().join("d/t.sql")),
        framed("INSERT INTO `t` VALUES (1);\nINSERT INTO `t` VALUES (2);\n")
    );
}
