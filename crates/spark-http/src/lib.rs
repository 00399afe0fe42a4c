#![doc = r#"
spark-http：运行在 spark-fiber Worker 上的 HTTP/1.x 服务。

# 教案式概览

## 意图 (Why)
- 演示如何用 [`spark_fiber::Service`] 的钩子组合出一个完整的请求/响应服务：
  分帧交给 [`RequestParser`]，业务交给返回响应流的处理器，写回与下载交给 Worker 心跳；
- 大文件上传与下载都不需要把整个负载放进内存。

## 模块地图 (How)
- [`parser`]：请求分帧，包含 multipart 的流式落盘；
- [`request`] / [`response`]：请求与响应模型；
- [`download`]：按发送缓冲容量逐块写出文件，附带背压统计；
- [`service`]：[`HttpService`] 及其事件名、处理器类型；
- [`config`] / [`error`]：配置与错误分类。

## 契约 (What)
- 只有请求显式携带 `Connection: keep-alive` 时才保持连接，否则响应写完后关闭；
- 不支持 `Transfer-Encoding`，带请求体的方法必须给出 `Content-Length`。
"#]

mod backpressure;
pub mod config;
pub mod download;
pub mod error;
pub mod parser;
pub mod request;
pub mod response;
pub mod service;

pub use backpressure::Pressure;
pub use config::HttpConfig;
pub use download::{Download, DownloadStep};
pub use error::HttpError;
pub use parser::RequestParser;
pub use request::{Headers, Request, UploadedFile};
pub use response::{Body, Response, reason_phrase};
pub use service::{
    DOWNLOAD_COMPLETE, Exchange, ExceptionHandler, Handler, HttpService, HttpWorker, RESPONSE,
    RESPONSE_SENT, ResponseStream, respond, respond_all,
};
