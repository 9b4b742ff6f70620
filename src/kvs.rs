pub type KvsPool = deadpool_redis::Pool;
pub type KvsPoolError = deadpool_redis::PoolError;
pub type KvsCreatePoolError = deadpool_redis::CreatePoolError;
pub type KvsError = redis::RedisError;

pub fn kvs_pool(url: &str) -> Result<KvsPool, KvsCreatePoolError> {
    let cfg = deadpool_redis::Config::from_url(url);
    cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1))
}

/// Pool creation only parses the URL; connections are opened lazily.
pub fn optional_kvs_pool(url: Option<&str>) -> Result<Option<KvsPool>, KvsCreatePoolError> {
    url.map(kvs_pool).transpose()
}
