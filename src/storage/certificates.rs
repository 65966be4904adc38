//! Durable certificate records.
//!
//! The store owns the single authoritative copy of every [`Certificate`];
//! services read and write through it on each operation and hold no state of
//! their own. Single-flight order marks live here too, so the check and the
//! mark are one transaction.

use crate::{
    core::types::Certificate,
    error::{Error, Result},
    storage::db::{BUCKET_CERTIFICATES, Db, Txn},
};

#[derive(Clone)]
pub struct CertificateStore {
    db: Db,
}

impl CertificateStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn get(&self, domain: &str) -> Result<Option<Certificate>> {
        self.db
            .with_txn(|txn| Self::get_with_txn(txn, domain))
    }

    pub fn list(&self) -> Result<Vec<Certificate>> {
        self.db.with_txn(|txn| {
            txn.scan(BUCKET_CERTIFICATES)?
                .into_iter()
                .map(|(_, value)| decode(&value))
                .collect()
        })
    }

    /// Inserts a fresh record; `AlreadyExists` if the domain is registered.
    pub fn create(&self, cert: &Certificate) -> Result<()> {
        self.db.with_txn(|txn| {
            if txn.get(BUCKET_CERTIFICATES, &cert.domain)?.is_some() {
                return Err(Error::AlreadyExists);
            }
            txn.put(BUCKET_CERTIFICATES, &cert.domain, &encode(cert)?)
        })
    }

    /// Applies `mutate` to the stored record in one read-modify-write
    /// transaction and returns the updated record.
    pub fn update(
        &self,
        domain: &str,
        mutate: impl FnOnce(&mut Certificate),
    ) -> Result<Certificate> {
        self.db.with_txn(|txn| {
            let mut cert = Self::get_with_txn(txn, domain)?.ok_or(Error::NotFound)?;
            mutate(&mut cert);
            txn.put(BUCKET_CERTIFICATES, domain, &encode(&cert)?)?;
            Ok(cert)
        })
    }

    /// Removes the record. Refused with `OrderInProgress` while an order is
    /// running for the domain.
    pub fn delete(&self, domain: &str) -> Result<()> {
        self.db.with_txn(|txn| {
            let cert = Self::get_with_txn(txn, domain)?.ok_or(Error::NotFound)?;
            if cert.order_in_flight {
                return Err(Error::OrderInProgress);
            }
            txn.delete(BUCKET_CERTIFICATES, domain)?;
            Ok(())
        })
    }

    /// Atomic single-flight check-and-mark: sets the in-flight mark for
    /// `domain`, failing with `OrderInProgress` if it is already set.
    pub fn begin_order(&self, domain: &str) -> Result<Certificate> {
        self.db.with_txn(|txn| {
            let mut cert = Self::get_with_txn(txn, domain)?.ok_or(Error::NotFound)?;
            if cert.order_in_flight {
                return Err(Error::OrderInProgress);
            }
            cert.order_in_flight = true;
            txn.put(BUCKET_CERTIFICATES, domain, &encode(&cert)?)?;
            Ok(cert)
        })
    }

    /// Clears the in-flight mark. A record deleted mid-order cannot happen
    /// (delete refuses while marked), so a missing record is an error.
    pub fn finish_order(&self, domain: &str) -> Result<()> {
        self.db.with_txn(|txn| {
            let mut cert = Self::get_with_txn(txn, domain)?.ok_or(Error::NotFound)?;
            cert.order_in_flight = false;
            txn.put(BUCKET_CERTIFICATES, domain, &encode(&cert)?)?;
            Ok(())
        })
    }

    /// Clears in-flight marks left behind by a crashed process. Called once
    /// at startup, before the scheduler starts; returns how many marks were
    /// released.
    pub fn release_stale_orders(&self) -> Result<usize> {
        self.db.with_txn(|txn| {
            let mut released = 0;
            for (domain, value) in txn.scan(BUCKET_CERTIFICATES)? {
                let mut cert = decode(&value)?;
                if cert.order_in_flight {
                    cert.order_in_flight = false;
                    txn.put(BUCKET_CERTIFICATES, &domain, &encode(&cert)?)?;
                    released += 1;
                }
            }
            Ok(released)
        })
    }

    fn get_with_txn(txn: &Txn<'_>, domain: &str) -> Result<Option<Certificate>> {
        txn.get(BUCKET_CERTIFICATES, domain)?
            .map(|value| decode(&value))
            .transpose()
    }
}

fn encode(cert: &Certificate) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(cert)?)
}

fn decode(value: &[u8]) -> Result<Certificate> {
    Ok(serde_json::from_slice(value)?)
}
