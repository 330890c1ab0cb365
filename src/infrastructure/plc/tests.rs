// PLC客户端相关的单元测试

#[cfg(test)]
mod tests {
    use crate::infrastructure::plc::mock_plc_client::MockPlcClient;
    use crate::infrastructure::plc::plc_client::{IPlcClient, PlcConnectionStatus};
    use serde_json::Value;

    /// 测试Mock PLC客户端的基本连接流程
    #[tokio::test]
    async fn test_mock_plc_client_basic_operations() {
        let client = MockPlcClient::new_for_testing("D1");

        assert_eq!(client.device_id(), "D1");
        assert!(!client.is_connected());
        assert_eq!(client.connection_status(), PlcConnectionStatus::Disconnected);

        client.connect().await.unwrap();
        assert!(client.is_connected());
        assert!(client.is_link_established().await.unwrap());
        assert!(client.is_device_ready().await.unwrap());

        client.disconnect().await.unwrap();
        assert!(!client.is_connected());
    }

    /// 未连接时所有读写操作应返回连接丢失错误
    #[tokio::test]
    async fn test_disconnected_client_rejects_operations() {
        let client = MockPlcClient::new_for_testing("D1");
        assert!(client.read_bool("DB1.DBX0.0").await.is_err());
        assert!(client.write_u16("DB1.DBW4", 1).await.is_err());
    }

    /// 测试布尔值读写及写入日志
    #[tokio::test]
    async fn test_bool_read_write() {
        let client = MockPlcClient::new_for_testing("D1");
        client.connect().await.unwrap();

        let address = "DB1.DBX0.0";
        client.write_bool(address, true).await.unwrap();
        assert!(client.read_bool(address).await.unwrap());

        assert!(client.was_address_written(address));
        let last_write = client.get_last_write().unwrap();
        assert_eq!(last_write.address, address);
        assert_eq!(last_write.value, Value::Bool(true));
        assert_eq!(last_write.operation_type, "write_bool");

        // 未预设的位地址默认读为 false
        assert!(!client.read_bool("DB1.DBX2.0").await.unwrap());
    }

    /// 测试字与双字读写
    #[tokio::test]
    async fn test_word_read_write() {
        let client = MockPlcClient::new_for_testing("D1");
        client.connect().await.unwrap();

        client.write_u16("DB1.DBW4", 65535).await.unwrap();
        assert_eq!(client.read_u16("DB1.DBW4").await.unwrap(), 65535);

        client.write_u32("DB1.DBD8", 1_000_000).await.unwrap();
        assert_eq!(client.read_u32("DB1.DBD8").await.unwrap(), 1_000_000);

        // 未预设的寄存器默认读为 0
        assert_eq!(client.read_u16("DB1.DBW100").await.unwrap(), 0);
    }

    /// 测试预设值与字符寄存器读取
    #[tokio::test]
    async fn test_preset_and_string_read() {
        let client = MockPlcClient::new_for_testing("D1");
        client.connect().await.unwrap();

        client.preset_read_value("DB1.DBW30", Value::String("A".to_string()));
        assert_eq!(client.read_string("DB1.DBW30").await.unwrap(), "A");

        // 未预设的字符寄存器默认读为 "0"
        assert_eq!(client.read_string("DB1.DBW32").await.unwrap(), "0");
    }

    /// 测试通信统计计数
    #[tokio::test]
    async fn test_communication_stats() {
        let client = MockPlcClient::new_for_testing("D1");
        client.connect().await.unwrap();

        client.write_bool("DB1.DBX0.0", true).await.unwrap();
        client.read_bool("DB1.DBX0.0").await.unwrap();
        client.read_u16("DB1.DBW4").await.unwrap();

        let stats = client.communication_stats();
        assert_eq!(stats.connection_count, 1);
        assert_eq!(stats.successful_writes, 1);
        assert_eq!(stats.successful_reads, 2);
        assert!(stats.last_communication_time.is_some());
    }
}
