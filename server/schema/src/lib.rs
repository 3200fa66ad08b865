#![deny(warnings)]

pub static DDL_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS species (
       id        INTEGER NOT NULL PRIMARY KEY,
       name      TEXT NOT NULL UNIQUE
     )",
    "CREATE TABLE IF NOT EXISTS pictures (
       id             INTEGER NOT NULL PRIMARY KEY,
       path           TEXT NOT NULL UNIQUE,
       datetime       TEXT NOT NULL,
       timestamp      INTEGER NOT NULL,
       camera         TEXT NOT NULL DEFAULT '',
       lens           TEXT NOT NULL DEFAULT '',
       mode           TEXT NOT NULL DEFAULT '',
       aperture       TEXT NOT NULL DEFAULT '',
       iso            TEXT NOT NULL DEFAULT '',
       exposure       TEXT NOT NULL DEFAULT '',
       focal          TEXT NOT NULL DEFAULT '',
       flash          TEXT NOT NULL DEFAULT '',
       width          INTEGER NOT NULL,
       height         INTEGER NOT NULL,
       landscape      BOOLEAN NOT NULL,
       note           TEXT NOT NULL DEFAULT '',
       starred        BOOLEAN NOT NULL DEFAULT 0,
       blurred        BOOLEAN NOT NULL DEFAULT 0,
       species_id     INTEGER,

       FOREIGN KEY (species_id) REFERENCES species(id) ON DELETE SET NULL
     )",
    "CREATE TABLE IF NOT EXISTS reviews (
       id        INTEGER NOT NULL PRIMARY KEY,
       name      TEXT NOT NULL UNIQUE,
       password  TEXT NOT NULL
     )",
    "CREATE TABLE IF NOT EXISTS review_pictures (
       review_name  TEXT NOT NULL,
       name         TEXT NOT NULL,
       review_id    INTEGER NOT NULL,
       path         TEXT NOT NULL,
       hash         TEXT NOT NULL,
       landscape    BOOLEAN NOT NULL,
       status       INTEGER NOT NULL DEFAULT 0,
       comment      TEXT NOT NULL DEFAULT '',

       PRIMARY KEY (review_name, name),
       FOREIGN KEY (review_id) REFERENCES reviews(id) ON DELETE CASCADE
     )",
];
